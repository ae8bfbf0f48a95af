use std::collections::HashMap;
use std::sync::RwLock;

use crate::{Backend, StoreError};

/// Process-local backing store.
#[derive(Default)]
pub struct MemoryBackend {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let values = self
            .values
            .read()
            .map_err(|e| StoreError::Backend(format!("lock poisoned: {}", e)))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut values = self
            .values
            .write()
            .map_err(|e| StoreError::Backend(format!("lock poisoned: {}", e)))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
