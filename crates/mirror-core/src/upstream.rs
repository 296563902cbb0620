//! Issuing protocol requests against a remote provider registry.
//!
//! The concrete base URL and `providers.v1` path for a hostname are
//! resolved by an external service-discovery collaborator
//! ([`DiscoverUpstream`]) -- out of scope for this crate, which only
//! depends on the trait.

use std::time::Duration;

use async_trait::async_trait;
use mirror_schema::{GpgPublicKey, Platform, ProviderDescriptor, ProviderKey, ProviderVersion, ProviderVersions};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

use crate::checksum::ChecksumManifest;

/// Identifies this crate's requests to upstream registries.
pub const USER_AGENT: &str = concat!("mirror-core/", env!("CARGO_PKG_VERSION"));

/// Errors from [`UpstreamClient`] operations.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// A transport-layer failure (connection refused, DNS failure,
    /// timeout) talking to upstream. The one kind list operations
    /// recover from by falling back to the mirror.
    #[error("network error contacting upstream: {0}")]
    Network(String),

    /// Upstream answered with a non-200 status.
    #[error("upstream responded with status {status}")]
    NotFound {
        /// The upstream HTTP status code.
        status: u16,
    },

    /// Upstream answered 200 but the body didn't decode as expected.
    #[error("failed to decode upstream response: {0}")]
    Decode(String),

    /// The service-discovery collaborator failed to resolve a hostname.
    #[error("service discovery failed: {0}")]
    Discovery(String),
}

impl UpstreamError {
    /// Whether this is the transport-layer failure kind.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<crate::error::MirrorError> for UpstreamError {
    fn from(err: crate::error::MirrorError) -> Self {
        Self::Decode(err.to_string())
    }
}

/// External collaborator resolving a provider registry hostname to its
/// base URL and `providers.v1` path, the way a client discovers those via
/// the hostname's `/.well-known/terraform.json` document.
#[async_trait]
pub trait DiscoverUpstream: Send + Sync {
    /// Resolve `hostname` to `(base_url, providers_v1_path)`.
    async fn discover(&self, hostname: &str) -> Result<(String, String), UpstreamError>;
}

#[derive(Debug, Deserialize)]
struct RawPlatform {
    os: String,
    arch: String,
}

#[derive(Debug, Deserialize)]
struct RawVersionEntry {
    version: String,
    #[serde(default)]
    protocols: Vec<String>,
    #[serde(default)]
    platforms: Vec<RawPlatform>,
}

#[derive(Debug, Deserialize)]
struct RawVersionsResponse {
    versions: Vec<RawVersionEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct RawGpgPublicKey {
    key_id: String,
    ascii_armor: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    source_url: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawSigningKeys {
    #[serde(default)]
    gpg_public_keys: Vec<RawGpgPublicKey>,
}

#[derive(Debug, Deserialize)]
struct RawProviderResponse {
    #[serde(default)]
    protocols: Vec<String>,
    #[serde(default)]
    os: String,
    #[serde(default)]
    arch: String,
    filename: String,
    download_url: String,
    shasum: String,
    shasums_url: String,
    shasums_signature_url: String,
    #[serde(default)]
    signing_keys: RawSigningKeys,
}

/// Client for the three upstream operations a pull-through mirror needs.
#[derive(Debug, Clone)]
pub struct UpstreamClient<D> {
    http: Client,
    discovery: D,
}

impl<D: DiscoverUpstream> UpstreamClient<D> {
    /// Build a client with a connection pool capped at a reasonable
    /// per-host idle-connection count.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Network`] if the underlying HTTP client
    /// fails to build (e.g. a broken TLS backend).
    pub fn new(discovery: D) -> Result<Self, UpstreamError> {
        let http = Client::builder()
            .pool_max_idle_per_host(100)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { http, discovery })
    }

    async fn resolve(&self, hostname: &str) -> Result<(String, String), UpstreamError> {
        self.discovery.discover(hostname).await
    }

    /// `GET <providers_v1>/<namespace>/<name>/versions`.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Network`] on a transport failure or
    /// deadline expiry, [`UpstreamError::NotFound`] on a non-200 status,
    /// or [`UpstreamError::Decode`] if the body isn't valid JSON in the
    /// expected shape.
    #[tracing::instrument(skip(self), fields(hostname = %key.hostname, namespace = %key.namespace, name = %key.name))]
    pub async fn list_provider_versions(
        &self,
        key: &ProviderKey,
        deadline: Duration,
    ) -> Result<ProviderVersions, UpstreamError> {
        let (base, providers_v1) = self.resolve(&key.hostname).await?;
        let url = format!(
            "{}{}/{}/{}/versions",
            base.trim_end_matches('/'),
            providers_v1,
            key.namespace,
            key.name
        );

        let response = tokio::time::timeout(deadline, self.http.get(&url).send())
            .await
            .map_err(|_| UpstreamError::Network("request timed out".to_string()))??;

        if !response.status().is_success() {
            return Err(UpstreamError::NotFound {
                status: response.status().as_u16(),
            });
        }

        let raw: RawVersionsResponse = response
            .json()
            .await
            .map_err(|err| UpstreamError::Decode(err.to_string()))?;

        Ok(ProviderVersions {
            versions: raw
                .versions
                .into_iter()
                .map(|entry| ProviderVersion {
                    version: entry.version,
                    protocols: entry.protocols,
                    platforms: entry
                        .platforms
                        .into_iter()
                        .map(|p| Platform { os: p.os, arch: p.arch })
                        .collect(),
                })
                .collect(),
        })
    }

    /// `GET <providers_v1>/<namespace>/<name>/<version>/download/<os>/<arch>`.
    ///
    /// The returned descriptor is back-filled with `hostname`, `namespace`,
    /// `name`, and `version` from `key`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::list_provider_versions`].
    #[tracing::instrument(skip(self), fields(hostname = %key.hostname, namespace = %key.namespace, name = %key.name, version = %key.version, os = %key.os, arch = %key.arch))]
    pub async fn get_provider(
        &self,
        key: &ProviderKey,
        deadline: Duration,
    ) -> Result<ProviderDescriptor, UpstreamError> {
        let (base, providers_v1) = self.resolve(&key.hostname).await?;
        let url = format!(
            "{}{}/{}/{}/{}/download/{}/{}",
            base.trim_end_matches('/'),
            providers_v1,
            key.namespace,
            key.name,
            key.version,
            key.os,
            key.arch
        );

        let response = tokio::time::timeout(deadline, self.http.get(&url).send())
            .await
            .map_err(|_| UpstreamError::Network("request timed out".to_string()))??;

        if !response.status().is_success() {
            return Err(UpstreamError::NotFound {
                status: response.status().as_u16(),
            });
        }

        let raw: RawProviderResponse = response
            .json()
            .await
            .map_err(|err| UpstreamError::Decode(err.to_string()))?;

        Ok(ProviderDescriptor {
            key: key.clone(),
            filename: raw.filename,
            download_url: raw.download_url,
            shasum: raw.shasum,
            shasums_url: raw.shasums_url,
            shasums_signature_url: raw.shasums_signature_url,
            signing_keys: raw
                .signing_keys
                .gpg_public_keys
                .into_iter()
                .map(|k| GpgPublicKey {
                    key_id: k.key_id,
                    ascii_armor: k.ascii_armor,
                    source: k.source,
                    source_url: k.source_url,
                })
                .collect(),
            platforms: None,
        })
    }

    /// `GET <descriptor.shasums_url>`, parsed via
    /// [`ChecksumManifest::parse`].
    ///
    /// # Errors
    ///
    /// Same as [`Self::list_provider_versions`], plus a decode error if
    /// the response body isn't a well-formed manifest.
    #[tracing::instrument(skip(self, descriptor), fields(name = %descriptor.key.name, version = %descriptor.key.version))]
    pub async fn sha_sums(
        &self,
        descriptor: &ProviderDescriptor,
        deadline: Duration,
    ) -> Result<ChecksumManifest, UpstreamError> {
        let response = tokio::time::timeout(deadline, self.http.get(&descriptor.shasums_url).send())
            .await
            .map_err(|_| UpstreamError::Network("request timed out".to_string()))??;

        if !response.status().is_success() {
            return Err(UpstreamError::NotFound {
                status: response.status().as_u16(),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|err| UpstreamError::Decode(err.to_string()))?;

        let expected_filename = format!(
            "terraform-provider-{}_{}_SHA256SUMS",
            descriptor.key.name, descriptor.key.version
        );
        ChecksumManifest::parse(&expected_filename, &text).map_err(UpstreamError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[tokio::test]
    async fn list_provider_versions_decodes_success_response() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/providers/hashicorp/random/versions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"versions":[{"version":"2.0.1","protocols":["5.0"],"platforms":[{"os":"linux","arch":"amd64"}]}]}"#)
            .create_async()
            .await;

        let client = UpstreamClient::new(StaticDiscovery {
            base_url: server.url(),
        })
        .unwrap();

        let key = ProviderKey::for_versions("registry.terraform.io", "hashicorp", "random");
        let versions = client
            .list_provider_versions(&key, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(versions.versions.len(), 1);
        assert_eq!(versions.versions[0].version, "2.0.1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_200_response_is_not_found() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v1/providers/hashicorp/random/versions")
            .with_status(503)
            .create_async()
            .await;

        let client = UpstreamClient::new(StaticDiscovery {
            base_url: server.url(),
        })
        .unwrap();

        let key = ProviderKey::for_versions("registry.terraform.io", "hashicorp", "random");
        let err = client
            .list_provider_versions(&key, Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, UpstreamError::NotFound { status: 503 }));
    }
}
