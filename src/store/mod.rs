//! Store gateway for endorsement artifacts
//!
//! The resolver depends only on the [`EndorsementStore`] trait: a single
//! logical table of `(key, value)` pairs where each value is the list of
//! artifacts stored for that key.
//!
//! Two backends are provided:
//! - [`MemoryStore`]: in-process map, the default and the one tests use
//! - `PostgresStore`: sqlx-backed table, behind the `postgres` feature
//!
//! A key whose stored artifact list is empty is reported as
//! [`StoreError::NotFound`]; `replace` with an empty list removes the key.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod seed;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;
pub use seed::load_seed_file;

use crate::config::{StoreBackend, StoreConfig};
use crate::coserv::Artifact;
use crate::error::StoreError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::Arc;

/// Key/value contract the resolver needs from the backing store
///
/// Implementations must be safe to share across concurrent requests.
#[async_trait]
pub trait EndorsementStore: Send + Sync {
    /// All artifacts stored under `key`, in storage order
    async fn fetch(&self, key: &str) -> Result<Vec<Artifact>, StoreError>;

    /// Atomically replace every artifact stored under `key`
    ///
    /// Concurrent readers observe either the previous set or the new one,
    /// never a mix.
    async fn replace(&self, key: &str, artifacts: Vec<Artifact>) -> Result<(), StoreError>;

    /// Backend name used in logs
    fn name(&self) -> &str;
}

/// Open the store selected by `config`
pub async fn open(config: &StoreConfig) -> crate::Result<Arc<dyn EndorsementStore>> {
    let store: Arc<dyn EndorsementStore> = match config.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        #[cfg(feature = "postgres")]
        StoreBackend::Postgres => {
            Arc::new(PostgresStore::connect(&config.database, &config.table).await?)
        }
        #[cfg(not(feature = "postgres"))]
        StoreBackend::Postgres => {
            return Err(crate::Error::Config(
                "postgres backend requested but this build lacks the `postgres` feature"
                    .to_string(),
            ))
        }
    };

    if let Some(seed) = &config.seed_file {
        let keys = load_seed_file(store.as_ref(), seed).await?;
        tracing::info!(backend = store.name(), keys, "Seeded store from {}", seed.display());
    }

    Ok(store)
}

/// Serialize artifacts into the stored value format: a JSON array of
/// base64-standard strings
pub fn encode_value(artifacts: &[Artifact]) -> String {
    let encoded: Vec<String> = artifacts
        .iter()
        .map(|a| STANDARD.encode(a.as_bytes()))
        .collect();
    serde_json::Value::from(encoded).to_string()
}

/// Parse a stored value back into artifacts
pub fn decode_value(key: &str, value: &str) -> Result<Vec<Artifact>, StoreError> {
    let malformed = |reason: String| StoreError::MalformedValue {
        key: key.to_string(),
        reason,
    };

    let encoded: Vec<String> = serde_json::from_str(value).map_err(|e| malformed(e.to_string()))?;
    encoded
        .iter()
        .map(|s| {
            STANDARD
                .decode(s)
                .map(Artifact::from)
                .map_err(|e| malformed(e.to_string()))
        })
        .collect()
}
