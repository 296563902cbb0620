//! In-memory memoization of upstream responses.
//!
//! Three disjoint keyspaces share one size-weighted, TTL-expiring cache
//! policy: version listings, single-platform descriptors, and checksum
//! manifests. Capacity is configured in megabytes and converted to bytes
//! (`mb * 2^20`) at construction.
//!
//! `moka`'s weigher callback must return a weight unconditionally, so it
//! can't itself decide to skip an insert. Size estimation therefore
//! happens in application code, in [`CacheLayer::put_versions`] and
//! friends, *before* the call into `moka`: if estimation fails the value
//! is still handed back to the caller, just never entered into the cache.

use std::sync::Arc;
use std::time::Duration;

use mirror_schema::{ProviderDescriptor, ProviderKey, ProviderVersions};
use moka::future::Cache;

use crate::checksum::ChecksumManifest;

fn versions_key(key: &ProviderKey) -> String {
    format!("versions:{}/{}/{}", key.hostname, key.namespace, key.name)
}

fn provider_key(key: &ProviderKey) -> String {
    format!(
        "provider:{}/{}/{}/{}/{}/{}",
        key.hostname, key.namespace, key.name, key.version, key.os, key.arch
    )
}

fn shasums_key(key: &ProviderKey) -> String {
    format!(
        "shasums:{}/{}/{}/{}",
        key.hostname, key.namespace, key.name, key.version
    )
}

fn estimate_weight<T: serde::Serialize>(value: &T) -> Option<u32> {
    serde_json::to_vec(value).ok().and_then(|bytes| u32::try_from(bytes.len()).ok())
}

/// A TTL- and size-bounded memoization layer over the three upstream
/// response shapes a mirror engine looks up repeatedly.
#[derive(Clone)]
pub struct CacheLayer {
    versions: Cache<String, Arc<ProviderVersions>>,
    providers: Cache<String, Arc<ProviderDescriptor>>,
    shasums: Cache<String, Arc<ChecksumManifest>>,
}

impl CacheLayer {
    /// Build a cache layer with `capacity_mb` of weighted capacity per
    /// keyspace and `ttl` applied from each entry's write time.
    pub fn new(capacity_mb: u64, ttl: Duration) -> Self {
        let max_capacity = capacity_mb.saturating_mul(1024 * 1024);
        Self {
            versions: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .weigher(|_: &String, value: &Arc<ProviderVersions>| {
                    estimate_weight(value.as_ref()).unwrap_or(u32::MAX)
                })
                .build(),
            providers: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .weigher(|_: &String, value: &Arc<ProviderDescriptor>| {
                    estimate_weight(value.as_ref()).unwrap_or(u32::MAX)
                })
                .build(),
            shasums: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .weigher(|_: &String, value: &Arc<ChecksumManifest>| {
                    estimate_weight(value.as_ref()).unwrap_or(u32::MAX)
                })
                .build(),
        }
    }

    /// Look up a cached version listing.
    pub async fn get_versions(&self, key: &ProviderKey) -> Option<Arc<ProviderVersions>> {
        self.versions.get(&versions_key(key)).await
    }

    /// Cache a version listing. Skipped (logged, not dropped) if the value
    /// can't be size-estimated; `value` is always returned to the caller
    /// either way by virtue of this method taking it by reference.
    pub async fn put_versions(&self, key: &ProviderKey, value: Arc<ProviderVersions>) {
        if estimate_weight(value.as_ref()).is_none() {
            tracing::warn!(key = %versions_key(key), "skipping cache insert: size estimation failed");
            return;
        }
        self.versions.insert(versions_key(key), value).await;
    }

    /// Look up a cached single-platform provider descriptor.
    pub async fn get_provider(&self, key: &ProviderKey) -> Option<Arc<ProviderDescriptor>> {
        self.providers.get(&provider_key(key)).await
    }

    /// Cache a single-platform provider descriptor.
    pub async fn put_provider(&self, key: &ProviderKey, value: Arc<ProviderDescriptor>) {
        if estimate_weight(value.as_ref()).is_none() {
            tracing::warn!(key = %provider_key(key), "skipping cache insert: size estimation failed");
            return;
        }
        self.providers.insert(provider_key(key), value).await;
    }

    /// Look up a cached checksum manifest.
    pub async fn get_shasums(&self, key: &ProviderKey) -> Option<Arc<ChecksumManifest>> {
        self.shasums.get(&shasums_key(key)).await
    }

    /// Cache a checksum manifest.
    pub async fn put_shasums(&self, key: &ProviderKey, value: Arc<ChecksumManifest>) {
        if estimate_weight(value.as_ref()).is_none() {
            tracing::warn!(key = %shasums_key(key), "skipping cache insert: size estimation failed");
            return;
        }
        self.shasums.insert(shasums_key(key), value).await;
    }
}
