//! 디렉토리 기반 키-값 저장소.
//!
//! 키 하나당 `<dir>/<인코딩된 키>.json` 파일 하나를 사용합니다.
//! 영숫자와 `_ - .` 이외의 문자는 `%XX`로 인코딩합니다 (예: `BRK/B` → `BRK%2FB`).

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use super::{KeyValueStore, StorageError};

const EXTENSION: &str = "json";

/// 임시 파일 이름 구분용 일련번호
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// 파일 저장소.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    max_bytes: Option<u64>,
}

impl FileStore {
    /// 저장소 디렉토리를 열거나 생성합니다.
    pub async fn open(dir: impl AsRef<Path>, max_bytes: Option<u64>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        info!(path = %dir.display(), max_bytes = ?max_bytes, "파일 저장소 열림");
        Ok(Self { dir, max_bytes })
    }

    /// 저장소 디렉토리.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", encode_key(key), EXTENSION))
    }

    /// `<파일명>.<pid>.<일련번호>.tmp`
    fn tmp_path_for(&self, path: &Path) -> PathBuf {
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(format!(".{}.{}.tmp", std::process::id(), seq));
        path.with_file_name(name)
    }

    /// 저장소 전체 사용량 (바이트). `except` 파일은 제외합니다.
    async fn used_bytes_except(&self, except: &Path) -> Result<u64, StorageError> {
        let mut total = 0u64;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path == except || path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            total += entry.metadata().await?.len();
        }
        Ok(total)
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let path = self.path_for(key);

        if let Some(limit) = self.max_bytes {
            let needed = self.used_bytes_except(&path).await? + value.len() as u64;
            if needed > limit {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    limit,
                });
            }
        }

        // 쓰기마다 별도 임시 파일에 쓰고 rename
        let tmp = self.tmp_path_for(&path);
        if let Err(e) = tokio::fs::write(&tmp, value.as_bytes()).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!(key, bytes = value.len(), "파일 저장");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(key) = decode_key(stem) {
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-' | b'.') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

fn decode_key(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_encoding() {
        assert_eq!(encode_key("terminal_cache_quote_AAPL"), "terminal_cache_quote_AAPL");
        assert_eq!(encode_key("terminal_cache_quote_BRK/B"), "terminal_cache_quote_BRK%2FB");
        assert_eq!(encode_key("x_^GSPC"), "x_%5EGSPC");
        assert_eq!(decode_key("x_%5EGSPC").as_deref(), Some("x_^GSPC"));
        assert_eq!(decode_key("broken%2"), None);
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("cache"), None).await.unwrap();

        store.set("p_BRK/B", "{\"v\":1}".to_string()).await.unwrap();
        store.set("p_AAPL", "{\"v\":2}".to_string()).await.unwrap();
        store.set("q_AAPL", "{}".to_string()).await.unwrap();

        assert_eq!(store.get("p_BRK/B").await.unwrap().as_deref(), Some("{\"v\":1}"));
        assert_eq!(store.keys("p_").await.unwrap(), vec!["p_AAPL", "p_BRK/B"]);

        store.remove("p_AAPL").await.unwrap();
        store.remove("p_AAPL").await.unwrap();
        assert_eq!(store.get("p_AAPL").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_to_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(FileStore::open(dir.path(), None).await.unwrap());

        let handles: Vec<_> = (0..100)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.set("q_AAPL", format!("{{\"v\":{}}}", i)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // 마지막 쓰기 하나가 온전히 남고 임시 파일은 없음
        let value = store.get("q_AAPL").await.unwrap().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&value).unwrap();
        assert!(parsed["v"].as_u64().unwrap() < 100);
        assert_eq!(store.keys("").await.unwrap(), vec!["q_AAPL"]);

        let mut leftovers = 0;
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            if entry.path().extension().and_then(|e| e.to_str()) == Some("tmp") {
                leftovers += 1;
            }
        }
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_file_store_quota() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), Some(16)).await.unwrap();

        store.set("a", "0123456789".to_string()).await.unwrap();
        // 같은 키 덮어쓰기는 허용
        store.set("a", "9876543210".to_string()).await.unwrap();

        let err = store.set("b", "0123456789".to_string()).await.unwrap_err();
        assert!(err.is_quota_exceeded());
        assert_eq!(store.get("b").await.unwrap(), None);
    }
}
