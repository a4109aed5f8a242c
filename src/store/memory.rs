//! In-memory store backend
//!
//! Default backend. Suitable for development, tests and single-instance
//! deployments seeded at startup. Data is lost on restart.

use super::EndorsementStore;
use crate::coserv::Artifact;
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory artifact table
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<Artifact>>>,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently holding artifacts
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl EndorsementStore for MemoryStore {
    async fn fetch(&self, key: &str) -> Result<Vec<Artifact>, StoreError> {
        match self.entries.read().await.get(key) {
            Some(artifacts) if !artifacts.is_empty() => Ok(artifacts.clone()),
            _ => Err(StoreError::NotFound(key.to_string())),
        }
    }

    async fn replace(&self, key: &str, artifacts: Vec<Artifact>) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        if artifacts.is_empty() {
            entries.remove(key);
            tracing::debug!(key = %key, "Removed artifacts");
        } else {
            tracing::debug!(key = %key, count = artifacts.len(), "Replaced artifacts");
            entries.insert(key.to_string(), artifacts);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
