//! The mirror's own persistent storage, abstracted behind a trait.
//!
//! `MirrorStore` is an external collaborator: a concrete object-storage
//! backend (S3, GCS, a filesystem tree) is out of scope for this crate,
//! the same way `apl-core`'s artifact store was a trait its indexer
//! depended on without owning an implementation. [`testing::InMemoryMirrorStore`]
//! is a test double used by the engine's own unit and integration tests.

use std::io;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use mirror_schema::{ProviderDescriptor, ProviderKey, ProviderVersions, SigningKeyset};

use crate::checksum::ChecksumManifest;
use crate::error::{MirrorError, ProviderError};

/// A boxed stream of byte chunks, the shape a download or upload body is
/// passed around as without buffering it fully into memory.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;

/// Everything the mirror engine needs from its own storage backend.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// Fetch the mirrored version listing for `(hostname, namespace, name)`,
    /// if the mirror has ever replicated one.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::ObjectNotFound`] if nothing has been mirrored
    /// for this coordinate yet.
    async fn get_mirrored_versions(&self, key: &ProviderKey) -> Result<ProviderVersions, MirrorError>;

    /// Fetch the mirrored descriptor for a fully-qualified platform key.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Provider`] wrapping
    /// [`ProviderError::not_found_in_mirror`] if this platform hasn't been
    /// replicated.
    async fn get_mirrored_provider(&self, key: &ProviderKey) -> Result<ProviderDescriptor, MirrorError>;

    /// Fetch the mirrored signing keyset for `(hostname, namespace)`.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::ObjectNotFound`] if no keyset has been stored.
    async fn get_signing_keys(&self, hostname: &str, namespace: &str) -> Result<SigningKeyset, MirrorError>;

    /// Replace the mirrored version listing.
    async fn put_mirrored_versions(&self, key: &ProviderKey, versions: ProviderVersions) -> Result<(), MirrorError>;

    /// Replace the mirrored descriptor for a fully-qualified platform key.
    async fn put_mirrored_provider(
        &self,
        key: &ProviderKey,
        descriptor: ProviderDescriptor,
    ) -> Result<(), MirrorError>;

    /// Merge `keys` into the stored signing keyset for `(hostname,
    /// namespace)`, returning the resulting merged keyset.
    async fn merge_signing_keys(
        &self,
        hostname: &str,
        namespace: &str,
        keys: SigningKeyset,
    ) -> Result<SigningKeyset, MirrorError>;

    /// Stream an archive's bytes out of the mirror, given its canonical
    /// archive filename.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::ObjectNotFound`] if the archive has not been
    /// replicated.
    async fn download_archive(&self, archive_filename: &str) -> Result<ByteStream, MirrorError>;

    /// Stream an archive's bytes into the mirror under its canonical
    /// archive filename.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::ObjectAlreadyExists`] if the mirror already
    /// holds an object at that filename.
    async fn upload_archive(&self, archive_filename: &str, body: ByteStream) -> Result<(), MirrorError>;

    /// Whether the mirror already holds an archive under this filename.
    async fn archive_exists(&self, archive_filename: &str) -> Result<bool, MirrorError>;

    /// Store a rendered checksum manifest.
    async fn put_shasums(&self, key: &ProviderKey, manifest_text: String) -> Result<(), MirrorError>;

    /// Store a raw detached signature blob.
    async fn put_signature(&self, key: &ProviderKey, signature: Vec<u8>) -> Result<(), MirrorError>;

    /// Fetch and parse the mirrored `SHA256SUMS` manifest covering
    /// `descriptor`'s version, per the `MirroredSha256Sum(descriptor)`
    /// operation in the mirror store contract.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::ObjectNotFound`] if no manifest has been
    /// mirrored for this provider's `(hostname, namespace, name, version)`.
    async fn get_mirrored_shasums(&self, descriptor: &ProviderDescriptor) -> Result<ChecksumManifest, MirrorError>;
}

/// Test double implementations of [`MirrorStore`].
pub mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use futures::stream;

    use super::*;

    fn versions_key(key: &ProviderKey) -> String {
        format!("{}/{}/{}", key.hostname, key.namespace, key.name)
    }

    fn provider_key(key: &ProviderKey) -> String {
        format!(
            "{}/{}/{}/{}/{}/{}",
            key.hostname, key.namespace, key.name, key.version, key.os, key.arch
        )
    }

    /// An in-memory [`MirrorStore`] used by the engine's own test suite.
    #[derive(Default)]
    pub struct InMemoryMirrorStore {
        versions: Mutex<HashMap<String, ProviderVersions>>,
        providers: Mutex<HashMap<String, ProviderDescriptor>>,
        keysets: Mutex<HashMap<String, SigningKeyset>>,
        archives: Mutex<HashMap<String, Vec<u8>>>,
        shasums: Mutex<HashMap<String, String>>,
        signatures: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl InMemoryMirrorStore {
        /// Build an empty store.
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed a version listing directly, bypassing the trait's
        /// replication semantics -- for test setup only.
        pub fn seed_versions(&self, key: &ProviderKey, versions: ProviderVersions) {
            self.versions.lock().unwrap().insert(versions_key(key), versions);
        }

        /// Seed a provider descriptor directly, for test setup only.
        pub fn seed_provider(&self, key: &ProviderKey, descriptor: ProviderDescriptor) {
            self.providers.lock().unwrap().insert(provider_key(key), descriptor);
        }

        /// Seed an archive's bytes directly, for test setup only.
        pub fn seed_archive(&self, archive_filename: &str, bytes: Vec<u8>) {
            self.archives.lock().unwrap().insert(archive_filename.to_string(), bytes);
        }

        /// Seed a signing keyset directly, for test setup only.
        pub fn seed_keys(&self, hostname: &str, namespace: &str, keys: SigningKeyset) {
            self.keysets
                .lock()
                .unwrap()
                .insert(format!("{hostname}/{namespace}"), keys);
        }

        /// Seed a rendered `SHA256SUMS` manifest directly, for test setup only.
        pub fn seed_shasums(&self, key: &ProviderKey, manifest_text: String) {
            self.shasums.lock().unwrap().insert(versions_key(key), manifest_text);
        }
    }

    #[async_trait]
    impl MirrorStore for InMemoryMirrorStore {
        async fn get_mirrored_versions(&self, key: &ProviderKey) -> Result<ProviderVersions, MirrorError> {
            self.versions
                .lock()
                .unwrap()
                .get(&versions_key(key))
                .cloned()
                .ok_or_else(|| MirrorError::ObjectNotFound(versions_key(key)))
        }

        async fn get_mirrored_provider(&self, key: &ProviderKey) -> Result<ProviderDescriptor, MirrorError> {
            self.providers
                .lock()
                .unwrap()
                .get(&provider_key(key))
                .cloned()
                .ok_or_else(|| ProviderError::not_found_in_mirror(key.clone()).into())
        }

        async fn get_signing_keys(&self, hostname: &str, namespace: &str) -> Result<SigningKeyset, MirrorError> {
            self.keysets
                .lock()
                .unwrap()
                .get(&format!("{hostname}/{namespace}"))
                .cloned()
                .ok_or_else(|| MirrorError::ObjectNotFound(format!("{hostname}/{namespace}")))
        }

        async fn put_mirrored_versions(
            &self,
            key: &ProviderKey,
            versions: ProviderVersions,
        ) -> Result<(), MirrorError> {
            self.versions.lock().unwrap().insert(versions_key(key), versions);
            Ok(())
        }

        async fn put_mirrored_provider(
            &self,
            key: &ProviderKey,
            descriptor: ProviderDescriptor,
        ) -> Result<(), MirrorError> {
            self.providers.lock().unwrap().insert(provider_key(key), descriptor);
            Ok(())
        }

        async fn merge_signing_keys(
            &self,
            hostname: &str,
            namespace: &str,
            keys: SigningKeyset,
        ) -> Result<SigningKeyset, MirrorError> {
            let mut keysets = self.keysets.lock().unwrap();
            let entry = keysets.entry(format!("{hostname}/{namespace}")).or_default();
            entry.merge(&keys);
            Ok(entry.clone())
        }

        async fn download_archive(&self, archive_filename: &str) -> Result<ByteStream, MirrorError> {
            let bytes = self
                .archives
                .lock()
                .unwrap()
                .get(archive_filename)
                .cloned()
                .ok_or_else(|| MirrorError::ObjectNotFound(archive_filename.to_string()))?;
            Ok(Box::pin(stream::once(async move { Ok(Bytes::from(bytes)) })))
        }

        async fn upload_archive(&self, archive_filename: &str, mut body: ByteStream) -> Result<(), MirrorError> {
            use futures::StreamExt;

            if self.archives.lock().unwrap().contains_key(archive_filename) {
                return Err(MirrorError::ObjectAlreadyExists(archive_filename.to_string()));
            }
            let mut buf = Vec::new();
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|err| MirrorError::ObjectNotFound(err.to_string()))?;
                buf.extend_from_slice(&chunk);
            }
            self.archives.lock().unwrap().insert(archive_filename.to_string(), buf);
            Ok(())
        }

        async fn archive_exists(&self, archive_filename: &str) -> Result<bool, MirrorError> {
            Ok(self.archives.lock().unwrap().contains_key(archive_filename))
        }

        async fn put_shasums(&self, key: &ProviderKey, manifest_text: String) -> Result<(), MirrorError> {
            self.shasums
                .lock()
                .unwrap()
                .insert(versions_key(key), manifest_text);
            Ok(())
        }

        async fn put_signature(&self, key: &ProviderKey, signature: Vec<u8>) -> Result<(), MirrorError> {
            self.signatures
                .lock()
                .unwrap()
                .insert(versions_key(key), signature);
            Ok(())
        }

        async fn get_mirrored_shasums(&self, descriptor: &ProviderDescriptor) -> Result<ChecksumManifest, MirrorError> {
            let text = self
                .shasums
                .lock()
                .unwrap()
                .get(&versions_key(&descriptor.key))
                .cloned()
                .ok_or_else(|| MirrorError::ObjectNotFound(versions_key(&descriptor.key)))?;
            let filename = format!(
                "terraform-provider-{}_{}_SHA256SUMS",
                descriptor.key.name, descriptor.key.version
            );
            ChecksumManifest::parse(&filename, &text)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn upload_then_download_round_trips() {
            let store = InMemoryMirrorStore::new();
            let body: ByteStream = Box::pin(stream::once(async { Ok(Bytes::from_static(b"zip-bytes")) }));
            store.upload_archive("terraform-provider-random_2.0.0_linux_amd64.zip", body).await.unwrap();

            assert!(store
                .archive_exists("terraform-provider-random_2.0.0_linux_amd64.zip")
                .await
                .unwrap());

            use futures::StreamExt;
            let mut stream = store
                .download_archive("terraform-provider-random_2.0.0_linux_amd64.zip")
                .await
                .unwrap();
            let mut collected = Vec::new();
            while let Some(chunk) = stream.next().await {
                collected.extend_from_slice(&chunk.unwrap());
            }
            assert_eq!(collected, b"zip-bytes");
        }

        #[tokio::test]
        async fn upload_rejects_duplicate_filename() {
            let store = InMemoryMirrorStore::new();
            let body: ByteStream = Box::pin(stream::once(async { Ok(Bytes::from_static(b"a")) }));
            store.upload_archive("dup.zip", body).await.unwrap();

            let body2: ByteStream = Box::pin(stream::once(async { Ok(Bytes::from_static(b"b")) }));
            let err = store.upload_archive("dup.zip", body2).await.unwrap_err();
            assert!(matches!(err, MirrorError::ObjectAlreadyExists(_)));
        }

        #[tokio::test]
        async fn missing_provider_returns_not_found_sentinel() {
            let store = InMemoryMirrorStore::new();
            let key = ProviderKey::for_platform(
                "registry.terraform.io",
                "hashicorp",
                "random",
                "2.0.0",
                "linux",
                "amd64",
            );
            let err = store.get_mirrored_provider(&key).await.unwrap_err();
            match err {
                MirrorError::Provider(provider_err) => assert!(provider_err.is_not_found()),
                other => panic!("expected Provider error, got {other:?}"),
            }
        }
    }
}
