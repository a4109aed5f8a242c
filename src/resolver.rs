//! Query resolution
//!
//! ```text
//! encoded query ─► decode ─► synthesize keys ─► fetch (concurrent, per key)
//!                                                      │
//!            encoded result ◄─ encode ◄─ concatenate in key order
//! ```
//!
//! A key with nothing stored contributes zero artifacts. Resolution fails
//! with [`ResolveError::NoArtifactsFound`] only when every key came back
//! empty. An empty key list is not a lookup at all and yields an empty
//! result.

use crate::coserv::{self, Artifact};
use crate::error::{ResolveError, StoreError};
use crate::keys;
use crate::store::EndorsementStore;
use futures::future::try_join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Resolves encoded CoSERV queries against an [`EndorsementStore`]
///
/// Holds no per-request state; one instance serves every request.
#[derive(Clone)]
pub struct Resolver {
    store: Arc<dyn EndorsementStore>,
    fetch_timeout: Option<Duration>,
}

impl Resolver {
    pub fn new(store: Arc<dyn EndorsementStore>) -> Self {
        Self {
            store,
            fetch_timeout: None,
        }
    }

    /// Bound the store lookups of a single resolution
    pub fn with_fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Resolve `encoded_query` for `tenant_id` into an encoded CoSERV result
    pub async fn resolve(
        &self,
        tenant_id: &str,
        encoded_query: &str,
    ) -> Result<Vec<u8>, ResolveError> {
        let query = coserv::decode(encoded_query)?;
        let keys = keys::synthesize(tenant_id, &query)?;

        debug!(
            tenant = %tenant_id,
            profile = %query.profile,
            artifact_type = %query.artifact_type,
            keys = keys.len(),
            "Synthesized lookup keys"
        );

        if keys.is_empty() {
            return Ok(coserv::encode(&query.profile, query.artifact_type, &[])?);
        }

        let artifacts = self.fetch_all(&keys).await?;
        if artifacts.is_empty() {
            info!(tenant = %tenant_id, keys = keys.len(), "No artifacts found");
            return Err(ResolveError::NoArtifactsFound);
        }

        info!(
            tenant = %tenant_id,
            artifact_type = %query.artifact_type,
            artifacts = artifacts.len(),
            "Resolved CoSERV query"
        );
        Ok(coserv::encode(&query.profile, query.artifact_type, &artifacts)?)
    }

    /// Fetch every key concurrently and concatenate the results in key order
    async fn fetch_all(&self, keys: &[String]) -> Result<Vec<Artifact>, ResolveError> {
        let fetches = try_join_all(keys.iter().map(|key| self.fetch_one(key)));

        let per_key = match self.fetch_timeout {
            Some(limit) => tokio::time::timeout(limit, fetches)
                .await
                .map_err(|_| ResolveError::Timeout(limit.as_millis() as u64))??,
            None => fetches.await?,
        };

        Ok(per_key.into_iter().flatten().collect())
    }

    async fn fetch_one(&self, key: &str) -> Result<Vec<Artifact>, StoreError> {
        match self.store.fetch(key).await {
            Ok(artifacts) => {
                debug!(key = %key, count = artifacts.len(), "Fetched artifacts");
                Ok(artifacts)
            }
            Err(StoreError::NotFound(_)) => {
                debug!(key = %key, "No artifacts stored");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coserv::{
        ArtifactType, ClassSelector, EnvironmentSelector, InstanceSelector, Query, ResultSet,
    };
    use crate::error::{DecodeError, SynthesisError};
    use crate::keys::{reference_value_key, trust_anchor_key};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const IMPL_ID: [u8; 8] = [0x7f, 0x45, 0x4c, 0x46, 0x02, 0x01, 0x01, 0x00];

    /// Store wrapper that counts calls and can be told to fail or stall
    struct ProbeStore {
        inner: MemoryStore,
        fetches: AtomicUsize,
        fail_with: Option<StoreError>,
        delay: Option<Duration>,
    }

    impl ProbeStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                fetches: AtomicUsize::new(0),
                fail_with: None,
                delay: None,
            }
        }
    }

    #[async_trait]
    impl EndorsementStore for ProbeStore {
        async fn fetch(&self, key: &str) -> Result<Vec<Artifact>, StoreError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = &self.fail_with {
                return Err(err.clone());
            }
            self.inner.fetch(key).await
        }

        async fn replace(&self, key: &str, artifacts: Vec<Artifact>) -> Result<(), StoreError> {
            self.inner.replace(key, artifacts).await
        }

        fn name(&self) -> &str {
            "probe"
        }
    }

    fn rv_key(impl_id: &[u8]) -> String {
        reference_value_key("0", &STANDARD.encode(impl_id))
    }

    fn rv_query(impl_ids: &[&[u8]]) -> String {
        Query::new(
            "P",
            ArtifactType::ReferenceValues,
            EnvironmentSelector {
                classes: impl_ids
                    .iter()
                    .map(|id| ClassSelector::from_impl_id(id.to_vec()))
                    .collect(),
                instances: vec![],
            },
        )
        .to_base64url()
        .unwrap()
    }

    fn artifact(tag: u8) -> Artifact {
        Artifact::new(vec![0xd2, tag])
    }

    #[tokio::test]
    async fn test_resolves_stored_artifacts() {
        let store = Arc::new(MemoryStore::new());
        store
            .replace(&rv_key(&IMPL_ID), vec![artifact(1), artifact(2)])
            .await
            .unwrap();

        let resolver = Resolver::new(store);
        let bytes = resolver.resolve("0", &rv_query(&[&IMPL_ID])).await.unwrap();

        let result = ResultSet::from_cbor(&bytes).unwrap();
        assert_eq!(result.profile, "P");
        assert_eq!(result.artifact_type, ArtifactType::ReferenceValues);
        assert_eq!(result.artifacts, vec![artifact(1), artifact(2)]);
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let resolver = Resolver::new(Arc::new(MemoryStore::new()));
        assert_eq!(
            resolver.resolve("0", &rv_query(&[&IMPL_ID])).await,
            Err(ResolveError::NoArtifactsFound)
        );
    }

    #[tokio::test]
    async fn test_concatenates_in_selector_order_skipping_missing_keys() {
        let store = Arc::new(MemoryStore::new());
        store.replace(&rv_key(&[1]), vec![artifact(1), artifact(2)]).await.unwrap();
        store.replace(&rv_key(&[3]), vec![artifact(3)]).await.unwrap();

        let resolver = Resolver::new(store);
        let bytes = resolver
            .resolve("0", &rv_query(&[&[3], &[2], &[1]]))
            .await
            .unwrap();

        let result = ResultSet::from_cbor(&bytes).unwrap();
        assert_eq!(result.artifacts, vec![artifact(3), artifact(1), artifact(2)]);
    }

    #[tokio::test]
    async fn test_trust_anchor_resolution() {
        let store = Arc::new(MemoryStore::new());
        let ueid = [0x01, 0xaa, 0xbb];
        store
            .replace(&trust_anchor_key("0", &STANDARD.encode(ueid)), vec![artifact(9)])
            .await
            .unwrap();

        let query = Query::new(
            "P",
            ArtifactType::TrustAnchors,
            EnvironmentSelector {
                classes: vec![],
                instances: vec![InstanceSelector::from_ueid(ueid)],
            },
        );
        let bytes = Resolver::new(store)
            .resolve("0", &query.to_base64url().unwrap())
            .await
            .unwrap();
        let result = ResultSet::from_cbor(&bytes).unwrap();
        assert_eq!(result.artifact_type, ArtifactType::TrustAnchors);
        assert_eq!(result.artifacts, vec![artifact(9)]);
    }

    #[tokio::test]
    async fn test_empty_selector_yields_empty_result() {
        let store = Arc::new(ProbeStore::new());
        let resolver = Resolver::new(store.clone());

        let bytes = resolver.resolve("0", &rv_query(&[])).await.unwrap();
        let result = ResultSet::from_cbor(&bytes).unwrap();
        assert!(result.artifacts.is_empty());
        assert_eq!(store.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_endorsed_values_never_touch_store() {
        let store = Arc::new(ProbeStore::new());
        let resolver = Resolver::new(store.clone());

        let query = Query::new(
            "P",
            ArtifactType::EndorsedValues,
            EnvironmentSelector {
                classes: vec![ClassSelector::from_impl_id(IMPL_ID)],
                instances: vec![],
            },
        );
        let err = resolver
            .resolve("0", &query.to_base64url().unwrap())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ResolveError::Synthesis(SynthesisError::UnsupportedArtifactType(
                ArtifactType::EndorsedValues
            ))
        );
        assert_eq!(store.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_class_selector() {
        let store = Arc::new(ProbeStore::new());
        let query = Query::new(
            "P",
            ArtifactType::ReferenceValues,
            EnvironmentSelector {
                classes: vec![ClassSelector {
                    vendor: Some("ACME".into()),
                    ..Default::default()
                }],
                instances: vec![],
            },
        );

        let err = Resolver::new(store.clone())
            .resolve("0", &query.to_base64url().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Synthesis(SynthesisError::InvalidClassSelector { index: 0, .. })
        ));
        assert_eq!(store.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_decode_errors_are_wrapped() {
        let resolver = Resolver::new(Arc::new(MemoryStore::new()));
        assert!(matches!(
            resolver.resolve("0", "%%%").await,
            Err(ResolveError::Decode(DecodeError::MalformedEncoding(_)))
        ));
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let mut store = ProbeStore::new();
        store.fail_with = Some(StoreError::ConnectionFailure("refused".into()));

        let err = Resolver::new(Arc::new(store))
            .resolve("0", &rv_query(&[&IMPL_ID]))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ResolveError::Store(StoreError::ConnectionFailure("refused".into()))
        );
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let mut store = ProbeStore::new();
        store.delay = Some(Duration::from_millis(200));

        let resolver = Resolver::new(Arc::new(store))
            .with_fetch_timeout(Some(Duration::from_millis(10)));
        assert_eq!(
            resolver.resolve("0", &rv_query(&[&IMPL_ID])).await,
            Err(ResolveError::Timeout(10))
        );
    }

    #[tokio::test]
    async fn test_fetches_are_issued_per_key() {
        let store = Arc::new(ProbeStore::new());
        let resolver = Resolver::new(store.clone());

        let _ = resolver.resolve("0", &rv_query(&[&[1], &[2], &[3]])).await;
        assert_eq!(store.fetches.load(Ordering::SeqCst), 3);
    }
}
