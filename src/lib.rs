//! Endorsement Distribution - CoSERV query resolution for attestation verifiers
//!
//! Remote verifiers ask this service for the reference values and trust
//! anchors they need to appraise attestation evidence. Requests and responses
//! use CoSERV (Concise Set of Endorsement/Reference Values) documents.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          HTTP API (axum)                          │
//! │   GET /endorsement-distribution/v1/coserv/:query                  │
//! │   - Accept negotiation (application/coserv+cbor)                  │
//! │   - RFC 7807 problem details                                      │
//! └───────────────────────────────┬─────────────────────────────────┘
//!                                 │ resolve(tenant, query)
//! ┌───────────────────────────────▼─────────────────────────────────┐
//! │                             Resolver                              │
//! │  ┌──────────────┐  ┌─────────────────┐  ┌────────────────────┐  │
//! │  │ Query Decoder│─►│ Key Synthesizer │─►│   Result Encoder   │  │
//! │  │  (coserv)    │  │     (keys)      │  │     (coserv)       │  │
//! │  └──────────────┘  └────────┬────────┘  └─────────▲──────────┘  │
//! │                             │ one fetch per key    │             │
//! └─────────────────────────────┼──────────────────────┼─────────────┘
//!                               │                      │
//! ┌─────────────────────────────▼──────────────────────┴─────────────┐
//! │                  Store Gateway (EndorsementStore)                 │
//! │          MemoryStore  │  PostgresStore (feature "postgres")       │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`coserv`]: CoSERV query/result model and CBOR codec
//! - [`keys`]: lookup key synthesis
//! - [`store`]: store gateway trait and backends
//! - [`resolver`]: query resolution orchestration
//! - [`api`]: HTTP transport
//! - [`config`]: configuration management

pub mod api;
pub mod config;
pub mod coserv;
pub mod error;
pub mod keys;
pub mod resolver;
pub mod store;

pub use config::ServiceConfig;
pub use error::{Error, Result};
pub use resolver::Resolver;
