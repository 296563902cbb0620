//! Orchestration of the three public mirror operations.
//!
//! `MirrorEngine` is the heart of the crate: per-request resolution
//! between a (cache-wrapped) [`UpstreamClient`] and a [`MirrorStore`],
//! applying the precedence, merge, and fall-back rules for each of the
//! three operations, and triggering a detached [`Copier`] run on an
//! archive-retrieval mirror miss.

use std::sync::Arc;
use std::time::Duration;

use mirror_schema::{ProviderDescriptor, ProviderKey, ProviderVersions};
use tokio::sync::broadcast;

use crate::cache::CacheLayer;
use crate::checksum::ChecksumManifest;
use crate::config::MirrorConfig;
use crate::copier::Copier;
use crate::error::MirrorError;
use crate::response::{ArchiveEntry, ArchiveLocation, InstallationResult, VersionsResult};
use crate::store::MirrorStore;
use crate::upstream::{DiscoverUpstream, UpstreamClient, UpstreamError};

/// Orchestrates `ListProviderVersions`, `ListProviderInstallation`, and
/// `RetrieveProviderArchive` between an upstream registry and the local
/// mirror store.
pub struct MirrorEngine<D, S> {
    upstream: UpstreamClient<D>,
    cache: CacheLayer,
    store: Arc<S>,
    copier: Copier<S>,
    shutdown: broadcast::Sender<()>,
    upstream_timeout: Duration,
}

impl<D, S> Clone for MirrorEngine<D, S>
where
    UpstreamClient<D>: Clone,
{
    fn clone(&self) -> Self {
        Self {
            upstream: self.upstream.clone(),
            cache: self.cache.clone(),
            store: self.store.clone(),
            copier: self.copier.clone(),
            shutdown: self.shutdown.clone(),
            upstream_timeout: self.upstream_timeout,
        }
    }
}

impl<D: DiscoverUpstream + Send + Sync + 'static, S: MirrorStore + Send + Sync + 'static> MirrorEngine<D, S> {
    /// Build an engine from an already-constructed upstream client, the
    /// mirror store it falls back to and replicates into, and the
    /// configured timeouts/cache sizing.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError`] if the `Copier`'s HTTP client fails to build.
    pub fn new(upstream: UpstreamClient<D>, store: Arc<S>, config: &MirrorConfig) -> Result<Self, MirrorError> {
        let cache = CacheLayer::new(config.cache_capacity_mb, config.cache_ttl());
        let copier = Copier::new(store.clone(), config.copy_budget(), config.archive_read_budget())
            .map_err(|err| MirrorError::Discovery(err.to_string()))?;
        let (shutdown, _) = broadcast::channel(16);
        Ok(Self {
            upstream,
            cache,
            store,
            copier,
            shutdown,
            upstream_timeout: config.upstream_timeout(),
        })
    }

    /// Broadcast the process-wide shutdown signal: every in-flight
    /// `Copier` run is cancelled. Requests already served are unaffected;
    /// new requests are still accepted (the HTTP front end's graceful
    /// shutdown is out of scope here).
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    async fn cached_list_versions(&self, key: &ProviderKey) -> Result<Arc<ProviderVersions>, MirrorError> {
        if let Some(hit) = self.cache.get_versions(key).await {
            return Ok(hit);
        }
        let versions = self.upstream.list_provider_versions(key, self.upstream_timeout).await?;
        let versions = Arc::new(versions);
        self.cache.put_versions(key, versions.clone()).await;
        Ok(versions)
    }

    async fn cached_provider(&self, key: &ProviderKey) -> Result<Arc<ProviderDescriptor>, MirrorError> {
        if let Some(hit) = self.cache.get_provider(key).await {
            return Ok(hit);
        }
        let descriptor = self.upstream.get_provider(key, self.upstream_timeout).await?;
        let descriptor = Arc::new(descriptor);
        self.cache.put_provider(key, descriptor.clone()).await;
        Ok(descriptor)
    }

    async fn cached_shasums(
        &self,
        key: &ProviderKey,
        descriptor: &ProviderDescriptor,
    ) -> Result<Arc<ChecksumManifest>, MirrorError> {
        if let Some(hit) = self.cache.get_shasums(key).await {
            return Ok(hit);
        }
        let manifest = self.upstream.sha_sums(descriptor, self.upstream_timeout).await?;
        let manifest = Arc::new(manifest);
        self.cache.put_shasums(key, manifest.clone()).await;
        Ok(manifest)
    }

    /// `ListProviderVersions`: fan out to the cached upstream client and
    /// the mirror store concurrently; prefer the upstream answer, falling
    /// back to the mirror only on a network-classified upstream failure.
    ///
    /// # Errors
    ///
    /// Propagates any non-network upstream error immediately. If upstream
    /// fails with a network error, returns the mirror's error if the
    /// mirror lookup also failed.
    #[tracing::instrument(skip(self), fields(hostname = %key.hostname, namespace = %key.namespace, name = %key.name))]
    pub async fn list_provider_versions(&self, key: &ProviderKey) -> Result<VersionsResult, MirrorError> {
        let (upstream_result, mirror_result) =
            tokio::join!(self.cached_list_versions(key), self.store.get_mirrored_versions(key));

        match upstream_result {
            Ok(versions) => Ok(VersionsResult::from_versions(
                versions.versions.iter().map(|v| v.version.clone()),
                false,
            )),
            Err(err) if err.is_network() => {
                tracing::debug!(error = %err, "upstream versions lookup failed over network, falling back to mirror");
                match mirror_result {
                    Ok(versions) => Ok(VersionsResult::from_versions(
                        versions.versions.into_iter().map(|v| v.version),
                        true,
                    )),
                    Err(mirror_err) => Err(mirror_err),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// `ListProviderInstallation`: resolve a per-platform archive map for
    /// `key.version`, preferring upstream and falling back to the mirror
    /// on a network-classified upstream failure.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::InvalidProvider`] if the selected version has
    /// no platforms, [`MirrorError::ChecksumMissing`] if the manifest lacks
    /// an entry for a platform's archive, [`MirrorError::UnexpectedMirrorState`]
    /// if the mirror fallback doesn't hold exactly one version record, or
    /// propagates any other upstream/mirror error per the rules above.
    #[tracing::instrument(skip(self), fields(hostname = %key.hostname, namespace = %key.namespace, name = %key.name, version = %key.version))]
    pub async fn list_provider_installation(&self, key: &ProviderKey) -> Result<InstallationResult, MirrorError> {
        let (upstream_result, mirror_result) = tokio::join!(
            self.upstream.list_provider_versions(key, self.upstream_timeout),
            self.store.get_mirrored_versions(key)
        );

        match upstream_result {
            Ok(versions) => self.installation_from_upstream(key, &versions).await,
            Err(err) if err.is_network() => {
                tracing::debug!(error = %err, "upstream installation lookup failed over network, falling back to mirror");
                match mirror_result {
                    Ok(versions) => self.installation_from_mirror(key, &versions).await,
                    Err(mirror_err) => Err(mirror_err),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn installation_from_upstream(
        &self,
        key: &ProviderKey,
        versions: &ProviderVersions,
    ) -> Result<InstallationResult, MirrorError> {
        let record = versions
            .versions
            .iter()
            .find(|v| v.version == key.version)
            .ok_or_else(|| MirrorError::InvalidProvider(format!("version '{}' not found upstream", key.version)))?;

        let first = record
            .platforms
            .first()
            .ok_or_else(|| MirrorError::InvalidProvider(format!("version '{}' has no platforms", key.version)))?;

        let descriptor_key = key.with_platform(&first.os, &first.arch);
        let descriptor = self.cached_provider(&descriptor_key).await?;
        let manifest = self.cached_shasums(key, &descriptor).await?;

        let mut result = InstallationResult::default();
        for platform in &record.platforms {
            let platform_key = key.with_platform(&platform.os, &platform.arch);
            let archive_filename = platform_key
                .archive_filename()
                .map_err(MirrorError::InvalidProvider)?;
            let checksum = manifest.checksum(&archive_filename)?;
            result.archives.insert(
                format!("{}_{}", platform.os, platform.arch),
                ArchiveEntry {
                    url: archive_filename,
                    hashes: vec![checksum.as_zh()],
                },
            );
        }
        result.from_mirror = false;
        Ok(result)
    }

    async fn installation_from_mirror(
        &self,
        key: &ProviderKey,
        versions: &ProviderVersions,
    ) -> Result<InstallationResult, MirrorError> {
        if versions.versions.len() != 1 {
            return Err(MirrorError::UnexpectedMirrorState(format!(
                "expected exactly one mirrored version record, found {}",
                versions.versions.len()
            )));
        }
        let record = &versions.versions[0];
        let first = record
            .platforms
            .first()
            .ok_or_else(|| MirrorError::InvalidProvider("mirrored version has no platforms".to_string()))?;

        let first_key = key.with_platform(&first.os, &first.arch);
        let first_descriptor = self.store.get_mirrored_provider(&first_key).await?;
        let manifest = self.store.get_mirrored_shasums(&first_descriptor).await?;

        let mut result = InstallationResult::default();
        for platform in &record.platforms {
            let platform_key = key.with_platform(&platform.os, &platform.arch);
            let descriptor = self.store.get_mirrored_provider(&platform_key).await?;
            let checksum = manifest.checksum(&descriptor.filename)?;
            result.archives.insert(
                format!("{}_{}", platform.os, platform.arch),
                ArchiveEntry {
                    url: descriptor.download_url.clone(),
                    hashes: vec![checksum.as_zh()],
                },
            );
        }
        result.from_mirror = true;
        Ok(result)
    }

    /// `RetrieveProviderArchive`: serve the mirror's copy if one exists;
    /// otherwise fetch the upstream descriptor, schedule a detached
    /// `Copier` run to replicate it, and hand back the upstream location.
    ///
    /// # Errors
    ///
    /// Propagates any mirror lookup error other than the "not found in
    /// mirror" sentinel, and any upstream error on a mirror miss.
    #[tracing::instrument(skip(self), fields(hostname = %key.hostname, namespace = %key.namespace, name = %key.name, version = %key.version, os = %key.os, arch = %key.arch))]
    pub async fn retrieve_provider_archive(&self, key: &ProviderKey) -> Result<ArchiveLocation, MirrorError> {
        match self.store.get_mirrored_provider(key).await {
            Ok(descriptor) => {
                return Ok(ArchiveLocation {
                    location: descriptor.download_url,
                    from_mirror: true,
                });
            }
            Err(MirrorError::Provider(ref provider_err)) if provider_err.is_not_found() => {}
            Err(other) => return Err(other),
        }

        let descriptor = self.upstream.get_provider(key, self.upstream_timeout).await?;
        self.cache.put_provider(key, Arc::new(descriptor.clone())).await;

        self.spawn_copy(descriptor.clone());

        Ok(ArchiveLocation {
            location: descriptor.download_url,
            from_mirror: false,
        })
    }

    /// Spawn a detached `Copier` run for `descriptor`. Errors are logged,
    /// never surfaced to the requester that triggered the copy; the task
    /// is cancellable only via [`Self::shutdown`], not by the caller
    /// dropping its own request context.
    fn spawn_copy(&self, descriptor: ProviderDescriptor) {
        let copier = self.copier.clone();
        let shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            match copier.spawn(descriptor, shutdown_rx).await {
                Ok(Ok(())) => tracing::debug!("copier run completed"),
                Ok(Err(err)) => tracing::warn!(error = %err, "copier run failed"),
                Err(join_err) => tracing::warn!(error = %join_err, "copier task panicked"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::InMemoryMirrorStore;
    use async_trait::async_trait;
    use mirror_schema::{Platform, ProviderVersion};
    use mockito::Server;

    struct StaticDiscovery {
        base_url: String,
    }

    #[async_trait]
    impl DiscoverUpstream for StaticDiscovery {
        async fn discover(&self, _hostname: &str) -> Result<(String, String), UpstreamError> {
            Ok((self.base_url.clone(), "/v1/providers".to_string()))
        }
    }

    fn key() -> ProviderKey {
        ProviderKey::for_platform(
            "registry.terraform.io",
            "hashicorp",
            "random",
            "2.0.0",
            "linux",
            "amd64",
        )
    }

    async fn engine_with(
        base_url: &str,
        store: Arc<InMemoryMirrorStore>,
    ) -> MirrorEngine<StaticDiscovery, InMemoryMirrorStore> {
        let upstream = UpstreamClient::new(StaticDiscovery {
            base_url: base_url.to_string(),
        })
        .unwrap();
        MirrorEngine::new(upstream, store, &MirrorConfig::default()).unwrap()
    }

    /// S1 -- upstream succeeds with a version the mirror doesn't have;
    /// response is the upstream answer, `from_mirror=false`.
    #[tokio::test]
    async fn s1_upstream_versions_preferred_over_mirror() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v1/providers/hashicorp/random/versions")
            .with_status(200)
            .with_body(r#"{"versions":[{"version":"2.0.1"}]}"#)
            .create_async()
            .await;

        let store = Arc::new(InMemoryMirrorStore::new());
        store.seed_versions(
            &key(),
            ProviderVersions {
                versions: vec![ProviderVersion {
                    version: "2.0.0".into(),
                    protocols: vec![],
                    platforms: vec![],
                }],
            },
        );

        let engine = engine_with(&server.url(), store).await;
        let result = engine.list_provider_versions(&key()).await.unwrap();

        assert!(!result.from_mirror);
        assert_eq!(result.versions.len(), 1);
        assert!(result.versions.contains_key("2.0.1"));
    }

    /// S2 -- upstream down, mirror has two platforms for 0.1.2 and one
    /// for 1.2.3; response aggregates distinct versions, `from_mirror=true`.
    #[tokio::test]
    async fn s2_falls_back_to_mirror_on_network_error() {
        // No mock registered -- any request 404s, which mockito surfaces
        // as a non-2xx status, not a transport failure, so instead point
        // discovery at an address nothing listens on to force a genuine
        // network error.
        let store = Arc::new(InMemoryMirrorStore::new());
        store.seed_versions(
            &key(),
            ProviderVersions {
                versions: vec![
                    ProviderVersion {
                        version: "0.1.2".into(),
                        protocols: vec![],
                        platforms: vec![
                            Platform { os: "linux".into(), arch: "amd64".into() },
                            Platform { os: "darwin".into(), arch: "arm64".into() },
                        ],
                    },
                    ProviderVersion {
                        version: "1.2.3".into(),
                        protocols: vec![],
                        platforms: vec![Platform { os: "linux".into(), arch: "amd64".into() }],
                    },
                ],
            },
        );

        let engine = engine_with("http://127.0.0.1:1", store).await;
        let result = engine.list_provider_versions(&key()).await.unwrap();

        assert!(result.from_mirror);
        assert_eq!(result.versions.len(), 2);
        assert!(result.versions.contains_key("0.1.2"));
        assert!(result.versions.contains_key("1.2.3"));
    }

    /// Non-network upstream errors (e.g. a decode failure from a 200
    /// response with an unexpected body) must propagate without
    /// consulting the mirror at all.
    #[tokio::test]
    async fn non_network_upstream_error_propagates_without_mirror_fallback() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v1/providers/hashicorp/random/versions")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let store = Arc::new(InMemoryMirrorStore::new());
        store.seed_versions(
            &key(),
            ProviderVersions {
                versions: vec![ProviderVersion {
                    version: "9.9.9".into(),
                    protocols: vec![],
                    platforms: vec![],
                }],
            },
        );

        let engine = engine_with(&server.url(), store).await;
        let err = engine.list_provider_versions(&key()).await.unwrap_err();
        assert!(matches!(err, MirrorError::Decode(_)));
    }

    /// S3 -- installation must call GetProvider with the platform from the
    /// *selected* version's record, never a platform from a different
    /// version.
    #[tokio::test]
    async fn s3_installation_selects_platform_from_requested_version_only() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v1/providers/hashicorp/random/versions")
            .with_status(200)
            .with_body(
                r#"{"versions":[
                    {"version":"1.0.0","platforms":[{"os":"solaris","arch":"arm64"},{"os":"linux","arch":"amd64"}]},
                    {"version":"2.0.0","platforms":[{"os":"linux","arch":"amd64"}]}
                ]}"#,
            )
            .create_async()
            .await;
        server
            .mock("GET", "/v1/providers/hashicorp/random/2.0.0/download/linux/amd64")
            .with_status(200)
            .with_body(
                r#"{"filename":"terraform-provider-random_2.0.0_linux_amd64.zip",
                    "download_url":"https://example.com/archive.zip",
                    "shasum":"deadbeef",
                    "shasums_url":"SHASUMS_PLACEHOLDER",
                    "shasums_signature_url":"https://example.com/SHA256SUMS.sig"}"#
                    .replace("SHASUMS_PLACEHOLDER", &format!("{}/SHA256SUMS", server.url())),
            )
            .create_async()
            .await;

        let digest = "a".repeat(64);
        server
            .mock("GET", "/SHA256SUMS")
            .with_status(200)
            .with_body(format!("{digest}  terraform-provider-random_2.0.0_linux_amd64.zip\n"))
            .create_async()
            .await;

        let store = Arc::new(InMemoryMirrorStore::new());
        let engine = engine_with(&server.url(), store).await;

        let mut request_key = key();
        request_key.version = "2.0.0".into();
        request_key.os = String::new();
        request_key.arch = String::new();

        let result = engine.list_provider_installation(&request_key).await.unwrap();
        assert!(!result.from_mirror);
        assert_eq!(result.archives.len(), 1);
        let entry = &result.archives["linux_amd64"];
        assert_eq!(entry.url, "terraform-provider-random_2.0.0_linux_amd64.zip");
        assert_eq!(entry.hashes, vec![format!("zh:{digest}")]);
    }

    /// S4 -- a mirror hit short-circuits entirely; no upstream call, no
    /// copier scheduled.
    #[tokio::test]
    async fn s4_mirror_hit_never_touches_upstream() {
        let store = Arc::new(InMemoryMirrorStore::new());
        store.seed_provider(
            &key(),
            ProviderDescriptor {
                key: key(),
                filename: "terraform-provider-random_2.0.0_linux_amd64.zip".into(),
                download_url: "terraform-provider-random_2.0.0_linux_amd64.zip".into(),
                shasum: "a".repeat(64),
                shasums_url: String::new(),
                shasums_signature_url: String::new(),
                signing_keys: vec![],
                platforms: None,
            },
        );

        // No upstream server at all: any fallback network call would fail
        // loudly rather than silently succeed, so a passing test proves
        // upstream was never consulted.
        let engine = engine_with("http://127.0.0.1:1", store).await;
        let result = engine.retrieve_provider_archive(&key()).await.unwrap();

        assert!(result.from_mirror);
        assert_eq!(result.location, "terraform-provider-random_2.0.0_linux_amd64.zip");
    }

    /// S5 -- a mirror miss falls through to upstream and schedules a copy.
    #[tokio::test]
    async fn s5_mirror_miss_falls_through_to_upstream() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v1/providers/hashicorp/random/2.0.0/download/linux/amd64")
            .with_status(200)
            .with_body(
                r#"{"filename":"terraform-provider-random_2.0.0_linux_amd64.zip",
                    "download_url":"https://example.com/archive.zip",
                    "shasum":"deadbeef",
                    "shasums_url":"https://example.com/SHA256SUMS",
                    "shasums_signature_url":"https://example.com/SHA256SUMS.sig"}"#,
            )
            .create_async()
            .await;

        let store = Arc::new(InMemoryMirrorStore::new());
        let engine = engine_with(&server.url(), store).await;

        let result = engine.retrieve_provider_archive(&key()).await.unwrap();
        assert!(!result.from_mirror);
        assert_eq!(result.location, "https://example.com/archive.zip");
    }
}
