//! End-to-end coverage of `MirrorEngine` spanning the cache, upstream
//! client, and mirror store together, plus the universal properties from
//! the mirror's operation contract that don't fit naturally as a single
//! module's unit tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mirror_core::config::MirrorConfig;
use mirror_core::engine::MirrorEngine;
use mirror_core::store::testing::InMemoryMirrorStore;
use mirror_core::upstream::{DiscoverUpstream, UpstreamClient, UpstreamError};
use mirror_schema::ProviderKey;
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

fn versions_key() -> ProviderKey {
    ProviderKey::for_versions("registry.terraform.io", "hashicorp", "random")
}

fn platform_key() -> ProviderKey {
    ProviderKey::for_platform(
        "registry.terraform.io",
        "hashicorp",
        "random",
        "2.0.0",
        "linux",
        "amd64",
    )
}

async fn engine_with(base_url: &str) -> MirrorEngine<StaticDiscovery, InMemoryMirrorStore> {
    let upstream = UpstreamClient::new(StaticDiscovery {
        base_url: base_url.to_string(),
    })
    .unwrap();
    let store = Arc::new(InMemoryMirrorStore::new());
    MirrorEngine::new(upstream, store, &MirrorConfig::default()).unwrap()
}

/// Universal property: two reads of the same coordinate within the TTL
/// return byte-equal results and issue exactly one upstream call -- the
/// second read is served entirely out of the cache.
#[tokio::test]
async fn repeated_versions_lookup_hits_upstream_exactly_once() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/v1/providers/hashicorp/random/versions")
        .with_status(200)
        .with_body(r#"{"versions":[{"version":"2.0.1"}]}"#)
        .create_async()
        .await;

    let engine = engine_with(&server.url()).await;

    let first = engine.list_provider_versions(&versions_key()).await.unwrap();
    let second = engine.list_provider_versions(&versions_key()).await.unwrap();

    assert_eq!(first.versions, second.versions);
    assert!(!first.from_mirror);
    assert!(!second.from_mirror);

    // mockito's default expectation is exactly one call; a second
    // request hitting the wire would fail this assertion.
    mock.assert_async().await;
}

/// A `RetrieveProviderArchive` mirror miss returns to the caller
/// immediately; the `Copier` run it schedules keeps going in the
/// background and is observable afterwards, independent of whatever
/// happened to the request that triggered it.
#[tokio::test]
async fn copy_continues_after_the_triggering_request_returns() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/v1/providers/hashicorp/random/2.0.0/download/linux/amd64")
        .with_status(200)
        .with_body(
            r#"{"filename":"terraform-provider-random_2.0.0_linux_amd64.zip",
                "download_url":"https://example.com/archive.zip",
                "shasum":"deadbeef",
                "shasums_url":"https://example.com/SHA256SUMS",
                "shasums_signature_url":"https://example.com/SHA256SUMS.sig",
                "signing_keys":{"gpg_public_keys":[{"key_id":"ABC123","ascii_armor":"armor-placeholder"}]}}"#,
        )
        .create_async()
        .await;
    // Deliberately no mock for /SHA256SUMS: the copier's later steps will
    // fail, but its first step (signing-key reconciliation) must still
    // run and persist before that happens.

    let upstream = UpstreamClient::new(StaticDiscovery {
        base_url: server.url(),
    })
    .unwrap();
    let store = Arc::new(InMemoryMirrorStore::new());
    let engine = MirrorEngine::new(upstream, store.clone(), &MirrorConfig::default()).unwrap();

    let key = platform_key();
    let result = engine.retrieve_provider_archive(&key).await.unwrap();
    assert!(!result.from_mirror);
    assert_eq!(result.location, "https://example.com/archive.zip");

    // The request is long finished here -- nothing above is still
    // awaiting the copier. Give the detached task a moment to run its
    // first step, then observe the side effect it left behind.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let keyset = store
        .get_signing_keys("registry.terraform.io", "hashicorp")
        .await
        .unwrap();
    assert_eq!(keyset.keys.len(), 1);
    assert_eq!(keyset.keys[0].key_id, "ABC123");
}

/// Shutting the engine down signals every in-flight copier, but a copy
/// spawned and completed before shutdown fires is unaffected by it.
#[tokio::test]
async fn shutdown_after_completion_does_not_undo_a_finished_copy() {
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

    let upstream = UpstreamClient::new(StaticDiscovery {
        base_url: server.url(),
    })
    .unwrap();
    let store = Arc::new(InMemoryMirrorStore::new());
    let engine = MirrorEngine::new(upstream, store, &MirrorConfig::default()).unwrap();

    let key = platform_key();
    engine.retrieve_provider_archive(&key).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Shutdown fires well after the copier's only observable step in
    // this scenario (no signing keys to reconcile) would have run; it
    // must not panic or otherwise disturb already-settled state.
    engine.shutdown();
}

/// Sanity check that a descriptor with no signing keys at all is a no-op
/// for the reconcile step rather than an error, exercised through the
/// full engine rather than `Copier` in isolation.
#[tokio::test]
async fn archive_descriptor_without_signing_keys_still_resolves() {
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

    let engine = engine_with(&server.url()).await;
    let result = engine.retrieve_provider_archive(&platform_key()).await.unwrap();
    assert!(!result.from_mirror);
}
