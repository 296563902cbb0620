//! Core domain types: provider coordinates, distribution descriptors,
//! version listings, and signing keysets.

use serde::{Deserialize, Serialize};

/// A fully- or partially-qualified coordinate identifying a provider
/// release. Any field past the ones an operation needs may be left empty
/// — `ListProviderVersions` only needs `hostname`/`namespace`/`name`,
/// while `RetrieveProviderArchive` needs all six.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderKey {
    pub hostname: String,
    pub namespace: String,
    pub name: String,
    pub version: String,
    pub os: String,
    pub arch: String,
}

impl ProviderKey {
    /// Build a key for a version listing request (no version/os/arch).
    pub fn for_versions(hostname: &str, namespace: &str, name: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Build a fully-qualified key for a single platform/version.
    #[allow(clippy::too_many_arguments)]
    pub fn for_platform(
        hostname: &str,
        namespace: &str,
        name: &str,
        version: &str,
        os: &str,
        arch: &str,
    ) -> Self {
        Self {
            hostname: hostname.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            os: os.to_string(),
            arch: arch.to_string(),
        }
    }

    /// Return a clone with `os`/`arch` overwritten, leaving `self`
    /// untouched. Used when iterating a version record's platform list —
    /// the caller's key must never be mutated in place while other tasks
    /// may be holding a reference to it.
    pub fn with_platform(&self, os: &str, arch: &str) -> Self {
        let mut cloned = self.clone();
        cloned.os = os.to_string();
        cloned.arch = arch.to_string();
        cloned
    }

    /// The canonical archive filename for this key:
    /// `terraform-provider-<name>_<version>_<os>_<arch>.zip`.
    ///
    /// # Errors
    ///
    /// Returns an error if `name`, `version`, `os`, or `arch` is empty.
    pub fn archive_filename(&self) -> Result<String, String> {
        if self.name.is_empty() || self.version.is_empty() || self.os.is_empty() || self.arch.is_empty() {
            return Err(format!(
                "cannot build archive filename from incomplete key: {self:?}"
            ));
        }
        Ok(format!(
            "terraform-provider-{}_{}_{}_{}.zip",
            self.name, self.version, self.os, self.arch
        ))
    }
}

/// One `(os, arch)` platform entry from an upstream version listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

/// One entry in a [`ProviderVersions`] listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderVersion {
    pub version: String,
    #[serde(default)]
    pub protocols: Vec<String>,
    #[serde(default)]
    pub platforms: Vec<Platform>,
}

/// The ordered sequence of versions returned by `ListProviderVersions`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderVersions {
    pub versions: Vec<ProviderVersion>,
}

/// A single armored GPG public key plus its provenance, as returned by the
/// upstream `GetProvider` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpgPublicKey {
    pub key_id: String,
    pub ascii_armor: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub source_url: String,
}

/// A `ProviderDescriptor` plus distribution metadata for one platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    #[serde(flatten)]
    pub key: ProviderKey,
    pub filename: String,
    pub download_url: String,
    pub shasum: String,
    pub shasums_url: String,
    pub shasums_signature_url: String,
    #[serde(default)]
    pub signing_keys: Vec<GpgPublicKey>,
    #[serde(default)]
    pub platforms: Option<Vec<Platform>>,
}

impl ProviderDescriptor {
    /// Deep-clone this descriptor. Platforms and signing keys are owned
    /// vectors already, so a plain [`Clone`] is sufficient, but this method
    /// documents the call sites where the engine relies on an independent
    /// copy before mutating `os`/`arch` on the embedded key.
    pub fn deep_clone(&self) -> Self {
        self.clone()
    }
}

/// Ordered list of armored public keys for a `(hostname, namespace)` pair.
/// Merged on write, never deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKeyset {
    pub keys: Vec<GpgPublicKey>,
}

impl SigningKeyset {
    /// Merge `other` into `self`, union-by-`key_id`, with `other`
    /// (upstream) winning on conflict. Returns `true` if the merged set
    /// differs from `self` before the call.
    pub fn merge(&mut self, other: &SigningKeyset) -> bool {
        let mut changed = false;
        for incoming in &other.keys {
            match self.keys.iter_mut().find(|k| k.key_id == incoming.key_id) {
                Some(existing) => {
                    if existing != incoming {
                        *existing = incoming.clone();
                        changed = true;
                    }
                }
                None => {
                    self.keys.push(incoming.clone());
                    changed = true;
                }
            }
        }
        changed
    }
}
