//! Parsing and querying a `SHA256SUMS` checksum manifest.
//!
//! A manifest is immutable once parsed: construction is the only place
//! validation happens, so every other method is infallible except for
//! the by-filename lookup.

use std::collections::HashMap;
use std::sync::OnceLock;

use mirror_schema::Sha256Hash;
use regex::Regex;
use serde::Serialize;

use crate::error::MirrorError;

fn filename_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^terraform-provider-.+_.+_SHA256SUMS$").unwrap())
}

fn name_version_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // The name group is greedy, so among the matches the two `.+` groups
    // admit it absorbs every underscore-separated token except the last
    // one, which lands in `version` — e.g. `random_provider_2.0.0` splits
    // into name `random_provider`, version `2.0.0`, not the other way
    // round.
    RE.get_or_init(|| {
        Regex::new(r"^terraform-provider-(?P<name>.+)_(?P<version>.+)_SHA256SUMS$").unwrap()
    })
}

/// A parsed `terraform-provider-<name>_<version>_SHA256SUMS` manifest:
/// archive filename to SHA-256 digest.
#[derive(Debug, Clone, Serialize)]
pub struct ChecksumManifest {
    filename: String,
    entries: HashMap<String, Sha256Hash>,
}

impl ChecksumManifest {
    /// Parse a manifest from its filename and raw text content.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::MalformedFilename`] if `filename` doesn't
    /// match `^terraform-provider-.+_.+_SHA256SUMS$`, or
    /// [`MirrorError::MalformedEntry`] if any non-empty line doesn't split
    /// into exactly two whitespace-delimited fields with a lowercase hex
    /// first field.
    pub fn parse(filename: &str, content: &str) -> Result<Self, MirrorError> {
        if !filename_pattern().is_match(filename) {
            return Err(MirrorError::MalformedFilename(filename.to_string()));
        }

        let mut entries = HashMap::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [hex_sum, archive_name] = fields[..] else {
                return Err(MirrorError::MalformedEntry {
                    line: idx + 1,
                    detail: "expected exactly two whitespace-delimited fields".to_string(),
                });
            };
            if hex_sum.chars().any(|c| !(c.is_ascii_hexdigit() && !c.is_ascii_uppercase())) {
                return Err(MirrorError::MalformedEntry {
                    line: idx + 1,
                    detail: format!("'{hex_sum}' is not lowercase hex"),
                });
            }
            hex::decode(hex_sum).map_err(|err| MirrorError::MalformedEntry {
                line: idx + 1,
                detail: err.to_string(),
            })?;
            entries.insert(archive_name.to_string(), Sha256Hash::new(hex_sum));
        }

        Ok(Self {
            filename: filename.to_string(),
            entries,
        })
    }

    /// The filename this manifest was parsed from.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Extract `(name, version)` from the manifest's filename.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::MalformedFilename`] if the filename doesn't
    /// match the name/version capture pattern (should not happen for a
    /// manifest that already passed [`Self::parse`]).
    pub fn name(&self) -> Result<(String, String), MirrorError> {
        let captures = name_version_pattern()
            .captures(&self.filename)
            .ok_or_else(|| MirrorError::MalformedFilename(self.filename.clone()))?;
        Ok((captures["name"].to_string(), captures["version"].to_string()))
    }

    /// Look up the checksum for an archive filename.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::ChecksumMissing`] if no entry exists for
    /// `archive_filename`.
    pub fn checksum(&self, archive_filename: &str) -> Result<&Sha256Hash, MirrorError> {
        self.entries
            .get(archive_filename)
            .ok_or_else(|| MirrorError::ChecksumMissing(archive_filename.to_string()))
    }

    /// Render back to `SHA256SUMS` text: one `"<hex>  <filename>"` line per
    /// entry (two spaces, mirroring the coreutils convention), sorted by
    /// filename for determinism.
    pub fn render(&self) -> String {
        let mut lines: Vec<String> = self
            .entries
            .iter()
            .map(|(name, hash)| format!("{hash}  {name}"))
            .collect();
        lines.sort();
        let mut out = lines.join("\n");
        if !out.is_empty() {
            out.push('\n');
        }
        out
    }
}
