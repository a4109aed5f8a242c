//! CoSERV query model and codec
//!
//! [`decode`] is the entry point used by the resolver. [`Query::encode`] and
//! [`Query::to_base64url`] produce the same document shape for clients.

use super::{int, map_get, tagged_bytes, ArtifactType, TAG_IMPL_ID, TAG_UEID};
use crate::error::{DecodeError, EncodeError};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use ciborium::value::Value;

/// A decoded CoSERV query
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub profile: String,
    pub artifact_type: ArtifactType,
    pub selector: EnvironmentSelector,
}

/// Environment selector. Only the list matching the query's artifact type is
/// ever read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvironmentSelector {
    pub classes: Vec<ClassSelector>,
    pub instances: Vec<InstanceSelector>,
}

/// Selects a device class by its class identifier
///
/// The class-id is kept as received so that a malformed identifier surfaces
/// at key synthesis with the selector's index, not as a document error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassSelector {
    pub class_id: Option<Value>,
    pub vendor: Option<String>,
    pub model: Option<String>,
}

/// Selects a single device by its instance identifier (UEID)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceSelector {
    pub instance_id: Option<Value>,
}

impl ClassSelector {
    /// Class selector for a `tagged-impl-id`
    pub fn from_impl_id(impl_id: impl Into<Vec<u8>>) -> Self {
        Self {
            class_id: Some(Value::Tag(TAG_IMPL_ID, Box::new(Value::Bytes(impl_id.into())))),
            ..Default::default()
        }
    }

    /// Implementation identifier bytes carried by the class-id
    pub fn impl_id(&self) -> Result<&[u8], String> {
        let class_id = self.class_id.as_ref().ok_or("missing class-id")?;
        let bytes = tagged_bytes(class_id, TAG_IMPL_ID)
            .ok_or("class-id is not a byte string or tagged impl-id")?;
        if bytes.is_empty() {
            return Err("empty class-id".to_string());
        }
        Ok(bytes)
    }

    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let Value::Map(map) = value else {
            return Err(malformed("class selector must be a map"));
        };
        Ok(Self {
            class_id: map_get(map, 0).cloned(),
            vendor: optional_text(map, 1, "class vendor")?,
            model: optional_text(map, 2, "class model")?,
        })
    }

    fn to_value(&self) -> Value {
        let mut map = Vec::new();
        if let Some(class_id) = &self.class_id {
            map.push((int(0), class_id.clone()));
        }
        if let Some(vendor) = &self.vendor {
            map.push((int(1), Value::Text(vendor.clone())));
        }
        if let Some(model) = &self.model {
            map.push((int(2), Value::Text(model.clone())));
        }
        Value::Map(map)
    }
}

impl InstanceSelector {
    /// Instance selector for a `tagged-ueid`
    pub fn from_ueid(ueid: impl Into<Vec<u8>>) -> Self {
        Self {
            instance_id: Some(Value::Tag(TAG_UEID, Box::new(Value::Bytes(ueid.into())))),
        }
    }

    /// UEID bytes carried by the instance-id
    pub fn ueid(&self) -> Result<&[u8], String> {
        let instance_id = self.instance_id.as_ref().ok_or("missing instance-id")?;
        let bytes = tagged_bytes(instance_id, TAG_UEID)
            .ok_or("instance-id is not a byte string or tagged UEID")?;
        if bytes.is_empty() {
            return Err("empty instance-id".to_string());
        }
        Ok(bytes)
    }

    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let Value::Map(map) = value else {
            return Err(malformed("instance selector must be a map"));
        };
        Ok(Self {
            instance_id: map_get(map, 1).cloned(),
        })
    }

    fn to_value(&self) -> Value {
        let mut map = Vec::new();
        if let Some(instance_id) = &self.instance_id {
            map.push((int(1), instance_id.clone()));
        }
        Value::Map(map)
    }
}

impl EnvironmentSelector {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let Value::Map(map) = value else {
            return Err(malformed("environment selector must be a map"));
        };
        Ok(Self {
            classes: sequence(map, 0, "class selectors", ClassSelector::from_value)?,
            instances: sequence(map, 1, "instance selectors", InstanceSelector::from_value)?,
        })
    }

    fn to_value(&self) -> Value {
        let mut map = Vec::new();
        if !self.classes.is_empty() {
            map.push((
                int(0),
                Value::Array(self.classes.iter().map(ClassSelector::to_value).collect()),
            ));
        }
        if !self.instances.is_empty() {
            map.push((
                int(1),
                Value::Array(self.instances.iter().map(InstanceSelector::to_value).collect()),
            ));
        }
        Value::Map(map)
    }
}

impl Query {
    pub fn new(
        profile: impl Into<String>,
        artifact_type: ArtifactType,
        selector: EnvironmentSelector,
    ) -> Self {
        Self {
            profile: profile.into(),
            artifact_type,
            selector,
        }
    }

    /// Parse a CBOR query document
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, DecodeError> {
        let doc: Value = ciborium::de::from_reader(bytes)
            .map_err(|e| DecodeError::MalformedDocument(e.to_string()))?;
        let Value::Map(top) = &doc else {
            return Err(malformed("CoSERV document must be a map"));
        };

        let profile = match map_get(top, 0) {
            None => return Err(DecodeError::MissingProfile),
            Some(Value::Text(p)) if p.is_empty() => return Err(DecodeError::MissingProfile),
            Some(Value::Text(p)) => p.clone(),
            Some(_) => return Err(malformed("profile must be a text string")),
        };

        let Some(Value::Map(query)) = map_get(top, 1) else {
            return Err(malformed("query object missing or not a map"));
        };

        let artifact_type = match map_get(query, 0) {
            Some(Value::Integer(code)) => ArtifactType::from_code(i128::from(*code))
                .ok_or_else(|| malformed(format!("unknown artifact type {}", i128::from(*code))))?,
            Some(_) => return Err(malformed("artifact type must be an integer")),
            None => return Err(malformed("artifact type missing")),
        };

        let selector = match map_get(query, 1) {
            Some(value) => EnvironmentSelector::from_value(value)?,
            None => return Err(malformed("environment selector missing")),
        };

        Ok(Self {
            profile,
            artifact_type,
            selector,
        })
    }

    /// Serialize to the CBOR query document
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let doc = Value::Map(vec![
            (int(0), Value::Text(self.profile.clone())),
            (
                int(1),
                Value::Map(vec![
                    (int(0), int(self.artifact_type.code())),
                    (int(1), self.selector.to_value()),
                ]),
            ),
        ]);
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&doc, &mut buf)
            .map_err(|e| EncodeError::SerializationFailure(e.to_string()))?;
        Ok(buf)
    }

    /// Serialize and wrap as unpadded base64url, ready for a request path
    pub fn to_base64url(&self) -> Result<String, EncodeError> {
        Ok(URL_SAFE_NO_PAD.encode(self.encode()?))
    }
}

/// Decode a base64url (unpadded) CoSERV query
pub fn decode(encoded: &str) -> Result<Query, DecodeError> {
    let mut normalized: String = encoded
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            c => c,
        })
        .collect();
    while normalized.len() % 4 != 0 {
        normalized.push('=');
    }

    let bytes = STANDARD
        .decode(normalized)
        .map_err(|e| DecodeError::MalformedEncoding(e.to_string()))?;
    Query::from_cbor(&bytes)
}

fn malformed(reason: impl Into<String>) -> DecodeError {
    DecodeError::MalformedDocument(reason.into())
}

fn optional_text(
    map: &[(Value, Value)],
    key: i64,
    what: &str,
) -> Result<Option<String>, DecodeError> {
    match map_get(map, key) {
        None => Ok(None),
        Some(Value::Text(text)) => Ok(Some(text.clone())),
        Some(_) => Err(malformed(format!("{} must be a text string", what))),
    }
}

fn sequence<T>(
    map: &[(Value, Value)],
    key: i64,
    what: &str,
    parse: fn(&Value) -> Result<T, DecodeError>,
) -> Result<Vec<T>, DecodeError> {
    match map_get(map, key) {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => items.iter().map(parse).collect(),
        Some(_) => Err(malformed(format!("{} must be an array", what))),
    }
}
