//! Parsing the canonical provider archive filename back into coordinates.
//!
//! [`mirror_schema::ProviderKey::archive_filename`] builds the filename;
//! [`parse_archive_filename`] is its inverse, used by
//! `NewProviderFromArchive`-shaped call sites that need to recover
//! `(name, version, os, arch)` from a filename the mirror store or an
//! upstream directory listing hands back.

use mirror_schema::ProviderKey;

use crate::error::MirrorError;

const PREFIX: &str = "terraform-provider-";
const SUFFIX: &str = ".zip";

/// Parse `terraform-provider-<name>_<version>_<os>_<arch>.zip` into a
/// [`ProviderKey`] with `hostname`/`namespace` left empty (the filename
/// carries no host/namespace information).
///
/// # Errors
///
/// Returns [`MirrorError::InvalidProvider`] unless the filename starts
/// with `terraform-provider-`, ends with `.zip`, and the remaining stem
/// splits into exactly four underscore-separated tokens.
pub fn parse_archive_filename(filename: &str) -> Result<ProviderKey, MirrorError> {
    let stem = filename
        .strip_prefix(PREFIX)
        .and_then(|rest| rest.strip_suffix(SUFFIX))
        .ok_or_else(|| {
            MirrorError::InvalidProvider(format!(
                "'{filename}' is not a terraform-provider-*.zip archive filename"
            ))
        })?;

    let tokens: Vec<&str> = stem.split('_').collect();
    let [name, version, os, arch] = tokens[..] else {
        return Err(MirrorError::InvalidProvider(format!(
            "'{filename}' does not split into exactly four underscore-separated tokens"
        )));
    };

    Ok(ProviderKey {
        hostname: String::new(),
        namespace: String::new(),
        name: name.to_string(),
        version: version.to_string(),
        os: os.to_string(),
        arch: arch.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_build_and_parse() {
        let key = ProviderKey::for_platform(
            "registry.terraform.io",
            "hashicorp",
            "random",
            "2.0.0",
            "linux",
            "amd64",
        );
        let filename = key.archive_filename().unwrap();
        let parsed = parse_archive_filename(&filename).unwrap();
        assert_eq!(parsed.name, key.name);
        assert_eq!(parsed.version, key.version);
        assert_eq!(parsed.os, key.os);
        assert_eq!(parsed.arch, key.arch);
        assert_eq!(parsed.archive_filename().unwrap(), filename);
    }

    #[test]
    fn rejects_wrong_prefix_or_suffix() {
        assert!(parse_archive_filename("random_2.0.0_linux_amd64.zip").is_err());
        assert!(parse_archive_filename("terraform-provider-random_2.0.0_linux_amd64.tar.gz").is_err());
    }

    #[test]
    fn rejects_wrong_token_count() {
        assert!(parse_archive_filename("terraform-provider-random_2.0.0_linux.zip").is_err());
        assert!(
            parse_archive_filename("terraform-provider-random_2.0.0_linux_amd64_extra.zip")
                .is_err()
        );
    }
}
