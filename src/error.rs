//! Error types for endorsement distribution
//!
//! Each stage of query resolution has its own error enum so the kind of a
//! failure survives all the way to the transport layer:
//!
//! ```text
//! DecodeError    ─┐
//! SynthesisError ─┼──► ResolveError ──► ErrorClass ──► HTTP status
//! StoreError     ─┤
//! EncodeError    ─┘
//! ```

use thiserror::Error;

/// Failure to turn an encoded query into a [`Query`](crate::coserv::Query)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The transport encoding (base64url) could not be decoded
    #[error("malformed query encoding: {0}")]
    MalformedEncoding(String),

    /// The binary document does not have the expected CoSERV shape
    #[error("malformed query document: {0}")]
    MalformedDocument(String),

    /// The profile field is absent or empty
    #[error("profile not found in CoSERV query")]
    MissingProfile,
}

/// Failure to derive lookup keys from a decoded query
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("invalid class selector at index {index}: {reason}")]
    InvalidClassSelector { index: usize, reason: String },

    #[error("invalid instance selector at index {index}: {reason}")]
    InvalidInstanceSelector { index: usize, reason: String },

    #[error("unsupported artifact type: {0}")]
    UnsupportedArtifactType(crate::coserv::ArtifactType),
}

/// Store gateway error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("no value stored for key: {0}")]
    NotFound(String),

    #[error("store connection failure: {0}")]
    ConnectionFailure(String),

    #[error("store transaction failure: {0}")]
    TransactionFailure(String),

    /// A stored value could not be decoded into artifacts
    #[error("malformed stored value for key {key}: {reason}")]
    MalformedValue { key: String, reason: String },
}

/// Result envelope serialization error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("failed to serialize CoSERV result: {0}")]
    SerializationFailure(String),
}

/// Error returned by [`Resolver::resolve`](crate::resolver::Resolver::resolve)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("no artifacts found")]
    NoArtifactsFound,

    #[error("store lookup timed out after {0} ms")]
    Timeout(u64),
}

/// Coarse outcome class the transport maps to a status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed or unsupported query (4xx)
    Client,
    /// Nothing matched the query (404)
    NotFound,
    /// Store or internal failure (5xx)
    Server,
}

impl ResolveError {
    /// Classify this error for the transport layer
    pub fn class(&self) -> ErrorClass {
        match self {
            ResolveError::Decode(_) | ResolveError::Synthesis(_) => ErrorClass::Client,
            ResolveError::NoArtifactsFound => ErrorClass::NotFound,
            ResolveError::Store(_) | ResolveError::Encode(_) | ResolveError::Timeout(_) => {
                ErrorClass::Server
            }
        }
    }
}

/// Service-level error (configuration, I/O, provisioning)
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Store error outside of query resolution
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for service operations
pub type Result<T> = std::result::Result<T, Error>;
