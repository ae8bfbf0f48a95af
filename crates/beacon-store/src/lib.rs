pub mod memory;
pub mod migrations;
pub mod sqlite;

use std::sync::Arc;

use tracing::{debug, warn};

use beacon_types::status::StatusRecord;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// Key the status record lives under in the backing store.
pub const STATUS_KEY: &str = "discord_status";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("backing store failure: {0}")]
    Backend(String),
    #[error("malformed stored record: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Keyed storage holding serialized values.
///
/// Implementations must make `set` an atomic whole-value replace for a key;
/// readers never see a partially written value.
pub trait Backend: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Shared handle to the current [`StatusRecord`].
///
/// The watcher writes through it and the HTTP handlers read through it;
/// there is no other link between the two.
#[derive(Clone)]
pub struct StatusStore {
    backend: Arc<dyn Backend>,
}

impl StatusStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Current record, or the default record if anything goes wrong.
    pub async fn get(&self) -> StatusRecord {
        match self.try_get().await {
            Ok(record) => record,
            Err(e) => {
                warn!("Status read failed, serving default: {}", e);
                StatusRecord::default()
            }
        }
    }

    /// Current record. A missing key is not an error: it yields the default.
    pub async fn try_get(&self) -> Result<StatusRecord, StoreError> {
        let backend = self.backend.clone();
        let raw = tokio::task::spawn_blocking(move || backend.get(STATUS_KEY)).await??;
        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(StatusRecord::default()),
        }
    }

    /// Replace the stored record. Failures are logged and dropped.
    pub async fn set(&self, record: &StatusRecord) {
        if let Err(e) = self.try_set(record).await {
            warn!("Status write failed, update dropped: {}", e);
        }
    }

    pub async fn try_set(&self, record: &StatusRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        let backend = self.backend.clone();
        tokio::task::spawn_blocking(move || backend.set(STATUS_KEY, &json)).await??;
        debug!("Stored status record: {}", record.message());
        Ok(())
    }

    /// Overwrite whatever a previous run left behind with the default record.
    pub async fn reset(&self) {
        self.set(&StatusRecord::default()).await;
    }
}
