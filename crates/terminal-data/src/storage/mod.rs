//! 키-값 저장소.
//!
//! 캐시 항목과 한도 상태를 JSON 문자열로 보관하는 단일 전역 저장소입니다.
//! 모든 연산은 키 하나만 다루며 다중 키 원자성은 보장하지 않습니다.
//!
//! - `MemoryStore` - 프로세스 메모리 (테스트, `--simulated` 실행)
//! - `FileStore` - 키당 JSON 파일 하나 (재시작 후에도 유지)
//!
//! 두 구현 모두 선택적 용량 한도를 두며, 초과 시 `StorageError::QuotaExceeded`를 반환합니다.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use terminal_core::{StorageBackend, StorageConfig};

pub use file::FileStore;
pub use memory::MemoryStore;

/// 저장소 오류.
#[derive(Debug, Error)]
pub enum StorageError {
    /// 용량 한도 초과
    #[error("저장 공간 부족: key={key}, 필요={needed}B, 한도={limit}B")]
    QuotaExceeded {
        /// 쓰려던 키
        key: String,
        /// 쓰기 후 예상 사용량
        needed: u64,
        /// 한도
        limit: u64,
    },

    /// 파일 I/O 오류
    #[error("저장소 I/O 오류: {0}")]
    Io(String),
}

impl StorageError {
    /// 용량 초과 오류인지 확인합니다.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, StorageError::QuotaExceeded { .. })
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

/// 키-값 저장소 trait.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// 값 조회.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// 값 저장 (덮어쓰기).
    async fn set(&self, key: &str, value: String) -> Result<(), StorageError>;

    /// 값 삭제. 없는 키는 무시합니다.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// 접두사로 시작하는 모든 키.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// 공유 저장소 핸들.
pub type SharedStore = Arc<dyn KeyValueStore>;

/// 설정에 맞는 저장소를 생성합니다.
pub async fn open_store(config: &StorageConfig) -> Result<SharedStore, StorageError> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::with_limit(config.max_bytes))),
        StorageBackend::File => {
            let store = FileStore::open(&config.path, config.max_bytes).await?;
            Ok(Arc::new(store))
        }
    }
}
