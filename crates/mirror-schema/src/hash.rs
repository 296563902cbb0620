use serde::{Deserialize, Serialize};

/// A SHA-256 hash string (64 lowercase hex characters) as it appears inside
/// a `SHA256SUMS` manifest entry.
///
/// Manifest entries are validated during parsing (each byte pair is
/// hex-decoded before being re-encoded), so this type performs no further
/// validation at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Sha256Hash(String);

impl Sha256Hash {
    /// Wrap an already-lowercased hex string.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Return the inner hex string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Render as a `zh:`-prefixed checksum, the encoding used by the
    /// client's dependency lock format.
    pub fn as_zh(&self) -> String {
        format!("zh:{}", self.0)
    }
}

impl std::fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Sha256Hash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for Sha256Hash {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for Sha256Hash {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_zh_prefix() {
        let hash = Sha256Hash::new("c".repeat(64));
        assert_eq!(hash.as_zh(), format!("zh:{}", "c".repeat(64)));
    }

    #[test]
    fn display_matches_as_str() {
        let hash = Sha256Hash::new("deadbeef");
        assert_eq!(hash.to_string(), hash.as_str());
    }
}
