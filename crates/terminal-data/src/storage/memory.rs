//! 인메모리 키-값 저장소.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{KeyValueStore, StorageError};

/// 인메모리 저장소.
///
/// 용량은 키와 값의 바이트 길이 합으로 계산합니다.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
    max_bytes: Option<u64>,
}

impl MemoryStore {
    /// 용량 제한 없는 저장소.
    pub fn new() -> Self {
        Self::default()
    }

    /// 용량 제한이 있는 저장소.
    pub fn with_limit(max_bytes: Option<u64>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_bytes,
        }
    }

    /// 현재 사용량 (바이트).
    pub fn used_bytes(&self) -> u64 {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .map(|(k, v)| (k.len() + v.len()) as u64)
            .sum()
    }

    /// 저장된 항목 수.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 비어 있는지 확인.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());

        if let Some(limit) = self.max_bytes {
            let current: u64 = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| (k.len() + v.len()) as u64)
                .sum();
            let needed = current + (key.len() + value.len()) as u64;
            if needed > limit {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    limit,
                });
            }
        }

        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}
