//! CoSERV result envelope

use super::{int, map_get, ArtifactType};
use crate::error::{DecodeError, EncodeError};
use ciborium::value::Value;

/// An opaque endorsement or trust-anchor statement
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Artifact(Vec<u8>);

impl Artifact {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Artifact {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Artifact {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

/// A decoded result envelope, as seen by clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSet {
    pub profile: String,
    pub artifact_type: ArtifactType,
    pub artifacts: Vec<Artifact>,
}

/// Encode a result envelope
pub fn encode(
    profile: &str,
    artifact_type: ArtifactType,
    artifacts: &[Artifact],
) -> Result<Vec<u8>, EncodeError> {
    let items = artifacts
        .iter()
        .map(|a| Value::Map(vec![(int(0), Value::Bytes(a.as_bytes().to_vec()))]))
        .collect();

    let doc = Value::Map(vec![
        (int(0), Value::Text(profile.to_string())),
        (
            int(1),
            Value::Map(vec![
                (int(0), int(artifact_type.code())),
                (int(1), Value::Array(items)),
            ]),
        ),
    ]);

    let mut buf = Vec::new();
    ciborium::ser::into_writer(&doc, &mut buf)
        .map_err(|e| EncodeError::SerializationFailure(e.to_string()))?;
    Ok(buf)
}

impl ResultSet {
    /// Parse a result envelope produced by [`encode`]
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, DecodeError> {
        let malformed = |reason: &str| DecodeError::MalformedDocument(reason.to_string());

        let doc: Value = ciborium::de::from_reader(bytes)
            .map_err(|e| DecodeError::MalformedDocument(e.to_string()))?;
        let Value::Map(top) = &doc else {
            return Err(malformed("result document must be a map"));
        };

        let profile = match map_get(top, 0) {
            Some(Value::Text(p)) if !p.is_empty() => p.clone(),
            _ => return Err(DecodeError::MissingProfile),
        };

        let Some(Value::Map(result)) = map_get(top, 1) else {
            return Err(malformed("result object missing or not a map"));
        };

        let artifact_type = match map_get(result, 0) {
            Some(Value::Integer(code)) => ArtifactType::from_code(i128::from(*code))
                .ok_or_else(|| malformed("unknown artifact type"))?,
            _ => return Err(malformed("artifact type missing")),
        };

        let Some(Value::Array(items)) = map_get(result, 1) else {
            return Err(malformed("artifact sequence missing"));
        };

        let artifacts = items
            .iter()
            .map(|item| match item {
                Value::Map(fields) => match map_get(fields, 0) {
                    Some(Value::Bytes(bytes)) => Ok(Artifact::from(bytes.clone())),
                    _ => Err(malformed("artifact must carry a byte string")),
                },
                _ => Err(malformed("artifact must be a map")),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            profile,
            artifact_type,
            artifacts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_envelope_shape() {
        let artifacts = vec![Artifact::new(vec![0xd2, 0x84]), Artifact::new(vec![0x01])];
        let bytes = encode("P", ArtifactType::ReferenceValues, &artifacts).unwrap();

        let doc: Value = ciborium::de::from_reader(bytes.as_slice()).unwrap();
        let Value::Map(top) = doc else {
            panic!("expected map")
        };
        assert_eq!(map_get(&top, 0), Some(&Value::Text("P".into())));

        let Some(Value::Map(result)) = map_get(&top, 1) else {
            panic!("expected result map")
        };
        assert_eq!(map_get(result, 0), Some(&int(2)));
        let Some(Value::Array(items)) = map_get(result, 1) else {
            panic!("expected artifact array")
        };
        assert_eq!(
            items[0],
            Value::Map(vec![(int(0), Value::Bytes(vec![0xd2, 0x84]))])
        );
    }

    #[test]
    fn test_decode_preserves_order() {
        let artifacts: Vec<Artifact> = (0u8..5).map(|i| Artifact::new(vec![i; 3])).collect();
        let bytes = encode("P", ArtifactType::TrustAnchors, &artifacts).unwrap();

        let result = ResultSet::from_cbor(&bytes).unwrap();
        assert_eq!(result.profile, "P");
        assert_eq!(result.artifact_type, ArtifactType::TrustAnchors);
        assert_eq!(result.artifacts, artifacts);
    }

    #[test]
    fn test_empty_artifact_sequence() {
        let bytes = encode("P", ArtifactType::ReferenceValues, &[]).unwrap();
        let result = ResultSet::from_cbor(&bytes).unwrap();
        assert!(result.artifacts.is_empty());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(ResultSet::from_cbor(&[0xff, 0x00]).is_err());
    }
}
