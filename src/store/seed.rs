//! Seed files for provisioning a store
//!
//! A seed file is a JSON object mapping lookup keys to base64-encoded
//! artifacts:
//!
//! ```json
//! {
//!   "ARM_CCA://0/rv/f0VMRgEBAQA...": ["0oRDoQEmoFkC...", "0oRDoQEmoFkD..."]
//! }
//! ```
//!
//! Each key is written with a single `replace`, so every key is provisioned
//! atomically.

use super::EndorsementStore;
use crate::coserv::Artifact;
use crate::error::{Error, StoreError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::BTreeMap;
use std::path::Path;

/// Parsed seed file, keys in sorted order
pub type Seed = BTreeMap<String, Vec<Artifact>>;

/// Parse seed JSON
pub fn parse_seed(json: &str) -> crate::Result<Seed> {
    let raw: BTreeMap<String, Vec<String>> = serde_json::from_str(json)?;
    raw.into_iter()
        .map(|(key, encoded)| {
            let artifacts = encoded
                .iter()
                .map(|s| STANDARD.decode(s).map(Artifact::from))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| {
                    Error::Store(StoreError::MalformedValue {
                        key: key.clone(),
                        reason: e.to_string(),
                    })
                })?;
            Ok::<_, Error>((key, artifacts))
        })
        .collect()
}

/// Write every entry of `seed` into `store`
pub async fn apply_seed(store: &dyn EndorsementStore, seed: Seed) -> crate::Result<usize> {
    let count = seed.len();
    for (key, artifacts) in seed {
        store.replace(&key, artifacts).await?;
    }
    Ok(count)
}

/// Load a seed file from disk into `store`, returning the number of keys written
pub async fn load_seed_file(store: &dyn EndorsementStore, path: &Path) -> crate::Result<usize> {
    let json = tokio::fs::read_to_string(path).await?;
    let seed = parse_seed(&json)?;
    apply_seed(store, seed).await
}
