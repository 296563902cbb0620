//! Shared wire types for the provider registry mirror.
//!
//! This crate defines the canonical data structures used by both halves of
//! the mirror engine: the upstream client, the mirror store, and the
//! orchestrating engine. It includes the provider coordinate key, the
//! distribution descriptor, version listings, signing keysets, and typed
//! hash wrappers shared across components.

/// Typed wrappers for cryptographic hashes (SHA-256).
pub mod hash;
/// Core domain types: provider keys, descriptors, versions, and signing keys.
pub mod provider;

pub use hash::Sha256Hash;
pub use provider::{
    GpgPublicKey, Platform, ProviderDescriptor, ProviderKey, ProviderVersion, ProviderVersions,
    SigningKeyset,
};
