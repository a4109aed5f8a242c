//! CoSERV query and result documents
//!
//! CoSERV (Concise Set of Endorsement/Reference Values) documents are CBOR
//! maps keyed by small integers. A query travels as base64url text in the
//! request path; a result travels as raw CBOR in the response body.
//!
//! ```text
//! query  = { 0: profile, 1: { 0: artifact-type, 1: { 0: [class-sel*], 1: [instance-sel*] } } }
//! result = { 0: profile, 1: { 0: artifact-type, 1: [ { 0: bstr }* ] } }
//! ```

pub mod query;
pub mod result;

pub use query::{decode, ClassSelector, EnvironmentSelector, InstanceSelector, Query};
pub use result::{encode, Artifact, ResultSet};

use ciborium::value::{Integer, Value};
use std::fmt;
use std::str::FromStr;

/// Media type of CoSERV documents
pub const COSERV_MEDIA_TYPE: &str = "application/coserv+cbor";

/// CBOR tag for `tagged-impl-id` class identifiers
pub const TAG_IMPL_ID: u64 = 600;

/// CBOR tag for `tagged-ueid` instance identifiers
pub const TAG_UEID: u64 = 550;

/// Category of artifact a query asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactType {
    EndorsedValues,
    TrustAnchors,
    ReferenceValues,
}

impl ArtifactType {
    /// Wire integer for this artifact type
    pub fn code(self) -> i64 {
        match self {
            ArtifactType::EndorsedValues => 0,
            ArtifactType::TrustAnchors => 1,
            ArtifactType::ReferenceValues => 2,
        }
    }

    /// Parse a wire integer, `None` for unknown codes
    pub fn from_code(code: i128) -> Option<Self> {
        match code {
            0 => Some(ArtifactType::EndorsedValues),
            1 => Some(ArtifactType::TrustAnchors),
            2 => Some(ArtifactType::ReferenceValues),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactType::EndorsedValues => "endorsed-values",
            ArtifactType::TrustAnchors => "trust-anchors",
            ArtifactType::ReferenceValues => "reference-values",
        }
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "endorsed-values" => Ok(ArtifactType::EndorsedValues),
            "trust-anchors" => Ok(ArtifactType::TrustAnchors),
            "reference-values" => Ok(ArtifactType::ReferenceValues),
            other => Err(format!(
                "unknown artifact type '{}' (expected reference-values, trust-anchors or endorsed-values)",
                other
            )),
        }
    }
}

// =============================================================================
// CBOR helpers shared by query and result codecs
// =============================================================================

pub(crate) fn int(value: i64) -> Value {
    Value::Integer(Integer::from(value))
}

/// Look up an integer key in a CBOR map. Non-integer keys are skipped.
pub(crate) fn map_get(map: &[(Value, Value)], key: i64) -> Option<&Value> {
    map.iter().find_map(|(k, v)| match k {
        Value::Integer(i) if i128::from(*i) == i128::from(key) => Some(v),
        _ => None,
    })
}

/// Bytes of `value`, accepting either a bare byte string or one wrapped in `tag`
pub(crate) fn tagged_bytes(value: &Value, tag: u64) -> Option<&[u8]> {
    match value {
        Value::Bytes(bytes) => Some(bytes),
        Value::Tag(t, inner) if *t == tag => match inner.as_ref() {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        },
        _ => None,
    }
}
