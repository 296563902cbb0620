//! Internal response shapes returned by [`crate::engine::MirrorEngine`].
//!
//! Rendering these into the wire JSON described in the protocol's HTTP
//! surface (route mounting, the `?token=` query-param rewrite) is the
//! out-of-scope HTTP front end's job; the engine hands back these typed
//! values and a `from_mirror` provenance flag.

use std::collections::BTreeMap;

use serde::Serialize;

/// An empty JSON object, the value type of the `versions` map in
/// `ListProviderVersions`'s response (`{"2.0.0": {}, ...}`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EmptyObject {}

/// Response for `ListProviderVersions`: the set of distinct version
/// strings known to either source, plus whether the mirror served as the
/// fallback source.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VersionsResult {
    pub versions: BTreeMap<String, EmptyObject>,
    #[serde(skip)]
    pub from_mirror: bool,
}

impl VersionsResult {
    /// Build a result from an iterator of version strings, deduplicating
    /// via the backing `BTreeMap`.
    pub fn from_versions(versions: impl IntoIterator<Item = String>, from_mirror: bool) -> Self {
        Self {
            versions: versions.into_iter().map(|v| (v, EmptyObject {})).collect(),
            from_mirror,
        }
    }
}

/// One `{os}_{arch} -> {url, hashes}` entry in an installation response.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveEntry {
    pub url: String,
    pub hashes: Vec<String>,
}

/// Response for `ListProviderInstallation`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstallationResult {
    pub archives: BTreeMap<String, ArchiveEntry>,
    #[serde(skip)]
    pub from_mirror: bool,
}

/// Response for `RetrieveProviderArchive`: a redirect target plus
/// provenance.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveLocation {
    pub location: String,
    #[serde(skip)]
    pub from_mirror: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_result_dedupes_by_string_key() {
        let result = VersionsResult::from_versions(
            vec!["2.0.0".to_string(), "2.0.0".to_string(), "2.0.1".to_string()],
            false,
        );
        assert_eq!(result.versions.len(), 2);
        assert!(!result.from_mirror);
    }
}
