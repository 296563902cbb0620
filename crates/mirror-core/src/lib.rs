//! Pull-through caching mirror engine for a provider-registry protocol.
//!
//! This crate implements the core orchestration of a provider-registry
//! mirror: concurrent resolution between an upstream registry and a local
//! object store, checksum-manifest parsing, detached-signature
//! verification, and background replication of fetched artifacts. HTTP
//! routing, CLI entry points, authentication middleware, and concrete
//! object-store backends are external collaborators, not implemented here.

/// Parsing the canonical provider archive filename back into coordinates.
pub mod archive;
/// Size-weighted, TTL-expiring memoization of upstream responses.
pub mod cache;
/// Parsing and querying `SHA256SUMS` checksum manifests.
pub mod checksum;
/// Engine timeouts, budgets, and cache sizing, loadable from TOML/env.
pub mod config;
/// Background replication of upstream providers into the mirror store.
pub mod copier;
/// Error taxonomy shared across the crate's public operations.
pub mod error;
/// Orchestration of the three public mirror operations.
pub mod engine;
/// Response shapes returned by [`engine::MirrorEngine`]'s operations.
pub mod response;
/// Detached-signature verification over checksum manifests.
pub mod signature;
/// The `MirrorStore` trait the engine depends on for local persistence.
pub mod store;
/// Issuing protocol requests against a remote provider registry.
pub mod upstream;

pub use config::MirrorConfig;
pub use engine::MirrorEngine;
pub use error::{MirrorError, ProviderError};

/// Identifies this crate's outbound requests to upstream registries.
pub const USER_AGENT: &str = upstream::USER_AGENT;
