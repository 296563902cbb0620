//! Error taxonomy for the mirror engine.
//!
//! [`MirrorError`] is the top-level error every public operation returns.
//! Component-local errors (`UpstreamError`, `SignatureError`, `CopierError`)
//! convert into it at the engine boundary via [`From`], the same layering
//! `apl-core`'s `DownloadError`/`ArtifactError` split used between IO
//! helpers and their callers.

use mirror_schema::ProviderKey;
use thiserror::Error;

/// A provider-coordinate-scoped error returned by [`crate::store::MirrorStore`]
/// lookups, notably the "not found in mirror" sentinel that
/// [`crate::engine::MirrorEngine`] uses to decide whether to fall through to
/// upstream.
#[derive(Debug, Clone, Error)]
#[error("provider error for {key:?} (status {status}): {reason}")]
pub struct ProviderError {
    /// The provider coordinates the operation was attempted against.
    pub key: ProviderKey,
    /// Human-readable reason, e.g. `"not found in mirror"`.
    pub reason: String,
    /// HTTP status this error should surface with at the wire boundary.
    pub status: u16,
}

impl ProviderError {
    /// Build the canonical "not found in mirror" sentinel that
    /// `GetMirroredProvider` returns on a cache miss.
    pub fn not_found_in_mirror(key: ProviderKey) -> Self {
        Self {
            key,
            reason: "not found in mirror".to_string(),
            status: 404,
        }
    }

    /// Whether this is the "not found in mirror" sentinel specifically, as
    /// opposed to some other provider-scoped failure.
    pub fn is_not_found(&self) -> bool {
        self.reason == "not found in mirror"
    }
}

/// Every error kind the mirror engine's public operations can return,
/// mapped to the HTTP status it should surface with at the (out-of-scope)
/// wire boundary via [`MirrorError::status_code`].
#[derive(Debug, Error)]
pub enum MirrorError {
    /// A required path or query input was empty.
    #[error("required field missing: {0}")]
    VariableMissing(String),

    /// Caller is not authenticated.
    #[error("unauthorized")]
    Unauthorized,

    /// Caller presented an invalid token.
    #[error("invalid token")]
    InvalidToken,

    /// The mirror store already has an object at the target location.
    #[error("object already exists: {0}")]
    ObjectAlreadyExists(String),

    /// A mirror-internal lookup-by-key found nothing (not the provider
    /// "not found in mirror" sentinel, which is [`ProviderError`]).
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// A provider-coordinate-scoped failure, most commonly "not found in
    /// mirror" on `RetrieveProviderArchive`.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Upstream answered with a non-200 status.
    #[error("upstream responded with status {status}")]
    UpstreamNotFound {
        /// The upstream HTTP status code.
        status: u16,
    },

    /// A transport-layer failure talking to upstream. Recognized
    /// structurally by list operations so they can fall back to the
    /// mirror instead of failing the request.
    #[error("network error contacting upstream: {0}")]
    Network(String),

    /// Upstream responded but the body could not be decoded as expected.
    #[error("failed to decode upstream response: {0}")]
    Decode(String),

    /// The service-discovery collaborator failed to resolve a hostname.
    #[error("service discovery failed: {0}")]
    Discovery(String),

    /// A `SHA256SUMS` line did not split into exactly two whitespace
    /// fields, or its first field was not valid lowercase hex.
    #[error("malformed checksum manifest entry on line {line}: {detail}")]
    MalformedEntry {
        /// 1-indexed line number within the manifest.
        line: usize,
        /// Description of what was wrong with the line.
        detail: String,
    },

    /// A checksum manifest's filename did not match the expected
    /// `terraform-provider-<name>_<version>_SHA256SUMS` pattern.
    #[error("malformed manifest filename: {0}")]
    MalformedFilename(String),

    /// A checksum manifest had no entry for a required archive filename.
    #[error("checksum missing for archive {0}")]
    ChecksumMissing(String),

    /// Provider coordinates were incomplete for the operation being
    /// performed (e.g. building an archive filename from an empty field).
    #[error("invalid provider coordinates: {0}")]
    InvalidProvider(String),

    /// No key in the signing keyset verified the checksum manifest's
    /// detached signature.
    #[error("no signing key verified the manifest signature")]
    NoValidKey,

    /// A signature or key failed to decode, or cryptographic verification
    /// failed for a key whose id matched the signature's issuer.
    #[error("signature verification error: {0}")]
    Signature(String),

    /// The mirror held a shape of data `ListProviderInstallation`'s
    /// fallback path did not expect (e.g. more than one version record).
    #[error("unexpected mirror state: {0}")]
    UnexpectedMirrorState(String),
}

impl From<crate::upstream::UpstreamError> for MirrorError {
    fn from(err: crate::upstream::UpstreamError) -> Self {
        match err {
            crate::upstream::UpstreamError::Network(msg) => Self::Network(msg),
            crate::upstream::UpstreamError::NotFound { status } => Self::UpstreamNotFound { status },
            crate::upstream::UpstreamError::Decode(msg) => Self::Decode(msg),
            crate::upstream::UpstreamError::Discovery(msg) => Self::Discovery(msg),
        }
    }
}

impl From<crate::signature::SignatureError> for MirrorError {
    fn from(err: crate::signature::SignatureError) -> Self {
        match err {
            crate::signature::SignatureError::NoValidKey => Self::NoValidKey,
            other => Self::Signature(other.to_string()),
        }
    }
}

impl MirrorError {
    /// The HTTP status this error should surface with at the (external)
    /// wire boundary, per the propagation policy in the error design.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::VariableMissing(_) => 400,
            Self::Unauthorized | Self::InvalidToken => 401,
            Self::ObjectAlreadyExists(_) => 409,
            Self::Provider(err) => err.status,
            Self::UpstreamNotFound { .. } => 404,
            Self::ObjectNotFound(_)
            | Self::Network(_)
            | Self::Decode(_)
            | Self::Discovery(_)
            | Self::MalformedEntry { .. }
            | Self::MalformedFilename(_)
            | Self::ChecksumMissing(_)
            | Self::InvalidProvider(_)
            | Self::NoValidKey
            | Self::Signature(_)
            | Self::UnexpectedMirrorState(_) => 500,
        }
    }

    /// Whether this is a transport-layer failure talking to upstream, the
    /// one condition list operations recover from by consulting the
    /// mirror instead of propagating the error.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_not_found_has_404_status() {
        let key = ProviderKey::for_versions("registry.terraform.io", "hashicorp", "aws");
        let err = ProviderError::not_found_in_mirror(key);
        assert!(err.is_not_found());
        assert_eq!(err.status, 404);
    }

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(MirrorError::VariableMissing("x".into()).status_code(), 400);
        assert_eq!(MirrorError::Unauthorized.status_code(), 401);
        assert_eq!(MirrorError::ObjectAlreadyExists("x".into()).status_code(), 409);
        assert_eq!(MirrorError::UpstreamNotFound { status: 503 }.status_code(), 404);
        assert_eq!(MirrorError::NoValidKey.status_code(), 500);
    }
}
