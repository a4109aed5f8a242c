//! Lookup key synthesis
//!
//! Maps a decoded query to the ordered list of backing-store keys that hold
//! its artifacts. One key per selector entry, in selector order:
//!
//! ```text
//! reference values  ARM_CCA://<tenant>/rv/<base64(impl-id)>
//! trust anchors     ARM_CCA://<tenant>/ta/<base64(ueid)>
//! ```
//!
//! Keys are a pure function of the tenant and the extracted identifier, so
//! identical queries always resolve to identical keys.

use crate::coserv::{ArtifactType, ClassSelector, InstanceSelector, Query};
use crate::error::SynthesisError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Scheme name prefixed to every lookup key
pub const SCHEME_NAME: &str = "ARM_CCA";

/// Key under which reference values for an implementation are stored
pub fn reference_value_key(tenant_id: &str, impl_id: &str) -> String {
    format!("{}://{}/rv/{}", SCHEME_NAME, tenant_id, impl_id)
}

/// Key under which trust anchors for a device instance are stored
pub fn trust_anchor_key(tenant_id: &str, instance_id: &str) -> String {
    format!("{}://{}/ta/{}", SCHEME_NAME, tenant_id, instance_id)
}

/// Derive the lookup keys for `query`, scoped to `tenant_id`
///
/// Only the selector list matching the artifact type is read. An empty list
/// yields no keys rather than an error.
pub fn synthesize(tenant_id: &str, query: &Query) -> Result<Vec<String>, SynthesisError> {
    match query.artifact_type {
        ArtifactType::ReferenceValues => reference_value_keys(tenant_id, &query.selector.classes),
        ArtifactType::TrustAnchors => trust_anchor_keys(tenant_id, &query.selector.instances),
        ArtifactType::EndorsedValues => Err(SynthesisError::UnsupportedArtifactType(
            ArtifactType::EndorsedValues,
        )),
    }
}

fn reference_value_keys(
    tenant_id: &str,
    classes: &[ClassSelector],
) -> Result<Vec<String>, SynthesisError> {
    classes
        .iter()
        .enumerate()
        .map(|(index, class)| {
            let impl_id = class
                .impl_id()
                .map_err(|reason| SynthesisError::InvalidClassSelector { index, reason })?;
            Ok(reference_value_key(tenant_id, &STANDARD.encode(impl_id)))
        })
        .collect()
}

fn trust_anchor_keys(
    tenant_id: &str,
    instances: &[InstanceSelector],
) -> Result<Vec<String>, SynthesisError> {
    instances
        .iter()
        .enumerate()
        .map(|(index, instance)| {
            let ueid = instance
                .ueid()
                .map_err(|reason| SynthesisError::InvalidInstanceSelector { index, reason })?;
            Ok(trust_anchor_key(tenant_id, &STANDARD.encode(ueid)))
        })
        .collect()
}
