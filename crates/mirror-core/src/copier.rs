//! Background replication of an upstream provider into the mirror.
//!
//! `Copier` is spawned detached (`tokio::spawn`) by the engine on a mirror
//! miss so the requesting client gets its redirect to the upstream
//! download URL immediately, without waiting on replication. It is never
//! awaited by the request path; the only way to stop it early is the
//! shutdown broadcast channel, the same cooperative-cancellation shape
//! `apl-core`'s download worker pool used for its in-flight fetches.
//!
//! A single run performs, in order: (1) reconcile the mirror's signing
//! keyset for the provider's `(hostname, namespace)` with the keys the
//! descriptor carried from upstream, (2) fetch and verify the checksum
//! manifest's detached signature, (3) fetch the archive while checking its
//! running digest against the manifest, uploading all three artifacts
//! (manifest, signature, archive) into the mirror store.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use mirror_schema::{ProviderDescriptor, SigningKeyset};
use reqwest::Client;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::checksum::ChecksumManifest;
use crate::signature::{self, SignatureError};
use crate::store::MirrorStore;

/// Errors from a single [`Copier::replicate`] run.
#[derive(Debug, Error)]
pub enum CopierError {
    /// The replication budget expired before the copy finished.
    #[error("copy exceeded its time budget")]
    BudgetExceeded,

    /// Fetching the archive, checksum manifest, or signature from upstream
    /// failed at the transport layer or returned a non-200 status.
    #[error("fetch from upstream failed: {0}")]
    Fetch(String),

    /// The fetched checksum manifest did not parse.
    #[error("checksum manifest invalid: {0}")]
    Manifest(String),

    /// The downloaded archive's checksum did not match the manifest.
    #[error("checksum mismatch for {filename}")]
    ChecksumMismatch {
        /// The archive filename that failed verification.
        filename: String,
    },

    /// Signature verification of the checksum manifest failed.
    #[error("signature verification failed: {0}")]
    Signature(#[from] SignatureError),

    /// Reconciling or writing the replicated artifact into the mirror
    /// store failed.
    #[error("mirror store write failed: {0}")]
    Store(String),

    /// The descriptor's provider coordinates were incomplete, e.g. an
    /// empty `os`/`arch` that can't build an archive filename.
    #[error("invalid provider coordinates: {0}")]
    InvalidProvider(String),

    /// The shutdown channel fired before the copy completed.
    #[error("copy cancelled by shutdown")]
    Cancelled,
}

/// Background task that re-fetches an upstream provider's checksum
/// manifest, signature, and archive, verifies them, and replicates them
/// (plus the provider's signing keys) into the mirror store.
pub struct Copier<S> {
    store: Arc<S>,
    http: Client,
    wall_clock_budget: Duration,
    body_read_budget: Duration,
}

impl<S> Clone for Copier<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            http: self.http.clone(),
            wall_clock_budget: self.wall_clock_budget,
            body_read_budget: self.body_read_budget,
        }
    }
}

impl<S: MirrorStore + Send + Sync + 'static> Copier<S> {
    /// Build a copier with the given time budgets: `wall_clock_budget`
    /// bounds the whole operation (fetch + verify + write), while
    /// `body_read_budget` additionally bounds each individual body-read
    /// step, so one slow chunked transfer can't quietly consume the whole
    /// wall-clock budget while other steps starve.
    ///
    /// # Errors
    ///
    /// Returns [`CopierError::Fetch`] if the underlying HTTP client fails
    /// to build.
    pub fn new(store: Arc<S>, wall_clock_budget: Duration, body_read_budget: Duration) -> Result<Self, CopierError> {
        let http = Client::builder()
            .pool_max_idle_per_host(100)
            .user_agent(crate::upstream::USER_AGENT)
            .build()
            .map_err(|err| CopierError::Fetch(err.to_string()))?;
        Ok(Self {
            store,
            http,
            wall_clock_budget,
            body_read_budget,
        })
    }

    /// Spawn a detached replication task. Returns immediately; the caller
    /// never awaits the returned handle on the request path, and dropping
    /// the originating request's context must not cancel this task --
    /// only `shutdown` firing does.
    pub fn spawn(
        self,
        descriptor: ProviderDescriptor,
        mut shutdown: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<Result<(), CopierError>> {
        tokio::spawn(async move {
            tokio::select! {
                result = self.replicate(descriptor) => result,
                _ = shutdown.recv() => Err(CopierError::Cancelled),
            }
        })
    }

    /// Run the full replication sequence under the wall-clock budget.
    ///
    /// # Errors
    ///
    /// Returns [`CopierError::BudgetExceeded`] if the whole operation
    /// exceeds `wall_clock_budget`; otherwise the first error from the
    /// step it occurred in (see the module docs for the step order).
    #[tracing::instrument(skip(self, descriptor), fields(hostname = %descriptor.key.hostname, namespace = %descriptor.key.namespace, name = %descriptor.key.name, version = %descriptor.key.version))]
    pub async fn replicate(&self, descriptor: ProviderDescriptor) -> Result<(), CopierError> {
        match tokio::time::timeout(self.wall_clock_budget, self.replicate_inner(&descriptor)).await {
            Ok(result) => result,
            Err(_) => Err(CopierError::BudgetExceeded),
        }
    }

    async fn replicate_inner(&self, descriptor: &ProviderDescriptor) -> Result<(), CopierError> {
        self.reconcile_signing_keys(descriptor).await?;

        let manifest_bytes = self.fetch_ok(&descriptor.shasums_url).await?;
        let shasums_filename = format!(
            "terraform-provider-{}_{}_SHA256SUMS",
            descriptor.key.name, descriptor.key.version
        );
        let manifest = ChecksumManifest::parse(&shasums_filename, &String::from_utf8_lossy(&manifest_bytes))
            .map_err(|err| CopierError::Manifest(err.to_string()))?;

        let signature_bytes = self.fetch_ok(&descriptor.shasums_signature_url).await?.to_vec();

        let keyset = self
            .store
            .get_signing_keys(&descriptor.key.hostname, &descriptor.key.namespace)
            .await
            .unwrap_or_default();
        signature::verify(&manifest_bytes, &signature_bytes, &keyset)?;

        self.store
            .put_shasums(&descriptor.key, String::from_utf8_lossy(&manifest_bytes).into_owned())
            .await
            .map_err(|err| CopierError::Store(err.to_string()))?;

        self.store
            .put_signature(&descriptor.key, signature_bytes)
            .await
            .map_err(|err| CopierError::Store(err.to_string()))?;

        let expected = manifest
            .checksum(&descriptor.filename)
            .map_err(|err| CopierError::Manifest(err.to_string()))?
            .as_str()
            .to_string();

        let archive_bytes = self.fetch_and_verify_archive(descriptor, &expected).await?;
        let archive_filename = descriptor.key.archive_filename().map_err(CopierError::InvalidProvider)?;

        self.store
            .upload_archive(
                &archive_filename,
                Box::pin(futures::stream::once(async move { Ok(archive_bytes) })),
            )
            .await
            .map_err(|err| CopierError::Store(err.to_string()))?;

        Ok(())
    }

    /// Step 1: merge `descriptor`'s signing keys into the mirror's stored
    /// keyset for this `(hostname, namespace)`. `MirrorStore::merge_signing_keys`
    /// is responsible for the "write back only if changed" optimization;
    /// this call site just supplies the union-by-key-id semantics.
    async fn reconcile_signing_keys(&self, descriptor: &ProviderDescriptor) -> Result<(), CopierError> {
        if descriptor.signing_keys.is_empty() {
            return Ok(());
        }
        self.store
            .merge_signing_keys(
                &descriptor.key.hostname,
                &descriptor.key.namespace,
                SigningKeyset {
                    keys: descriptor.signing_keys.clone(),
                },
            )
            .await
            .map(|_| ())
            .map_err(|err| CopierError::Store(err.to_string()))
    }

    async fn fetch_ok(&self, url: &str) -> Result<Bytes, CopierError> {
        let response = tokio::time::timeout(self.body_read_budget, self.http.get(url).send())
            .await
            .map_err(|_| CopierError::BudgetExceeded)?
            .map_err(|err| CopierError::Fetch(err.to_string()))?;

        if !response.status().is_success() {
            return Err(CopierError::Fetch(format!(
                "upstream responded with status {} for {url}",
                response.status()
            )));
        }

        tokio::time::timeout(self.body_read_budget, response.bytes())
            .await
            .map_err(|_| CopierError::BudgetExceeded)?
            .map_err(|err| CopierError::Fetch(err.to_string()))
    }

    async fn fetch_and_verify_archive(
        &self,
        descriptor: &ProviderDescriptor,
        expected_hex: &str,
    ) -> Result<Bytes, CopierError> {
        use sha2::{Digest, Sha256};

        let response = tokio::time::timeout(self.body_read_budget, self.http.get(&descriptor.download_url).send())
            .await
            .map_err(|_| CopierError::BudgetExceeded)?
            .map_err(|err| CopierError::Fetch(err.to_string()))?;

        if !response.status().is_success() {
            return Err(CopierError::Fetch(format!(
                "upstream responded with status {} for {}",
                response.status(),
                descriptor.download_url
            )));
        }

        let mut stream = response.bytes_stream();
        let mut hasher = Sha256::new();
        let mut buf = Vec::new();
        loop {
            let chunk = tokio::time::timeout(self.body_read_budget, stream.next())
                .await
                .map_err(|_| CopierError::BudgetExceeded)?;
            match chunk {
                Some(Ok(bytes)) => {
                    hasher.update(&bytes);
                    buf.extend_from_slice(&bytes);
                }
                Some(Err(err)) => return Err(CopierError::Fetch(err.to_string())),
                None => break,
            }
        }

        let actual = hex::encode(hasher.finalize());
        if actual != expected_hex {
            return Err(CopierError::ChecksumMismatch {
                filename: descriptor.filename.clone(),
            });
        }

        Ok(Bytes::from(buf))
    }
}
