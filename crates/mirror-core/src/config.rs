//! Tunables for the mirror engine's timeouts, cache sizing, and TTL.
//!
//! Loaded the way `apl-core::manifest::Manifest` loads `apl.toml` --
//! `serde` + `toml`, with defaults supplied inline and an environment-variable
//! override layer mirroring `apl-core::io::artifacts::ArtifactConfig::from_env`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_upstream_timeout_secs() -> u64 {
    10
}

fn default_archive_read_budget_secs() -> u64 {
    120
}

fn default_copy_budget_secs() -> u64 {
    180
}

fn default_cache_capacity_mb() -> u64 {
    256
}

fn default_cache_ttl_secs() -> u64 {
    300
}

/// Mirror engine configuration, loadable from a TOML file and overridable
/// per-field from the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Per-upstream-call deadline, in seconds. Default 10s per spec §5.
    #[serde(default = "default_upstream_timeout_secs")]
    pub upstream_timeout_secs: u64,

    /// Per-archive-download body-read budget, in seconds. Default 2min.
    #[serde(default = "default_archive_read_budget_secs")]
    pub archive_read_budget_secs: u64,

    /// Total wall-clock budget for one `Copier` run, in seconds. Default 3min.
    #[serde(default = "default_copy_budget_secs")]
    pub copy_budget_secs: u64,

    /// Size-weighted cache capacity in megabytes (converted to bytes as
    /// `capacity_mb * 2^20` by [`crate::cache::CacheLayer`]).
    #[serde(default = "default_cache_capacity_mb")]
    pub cache_capacity_mb: u64,

    /// Per-entry cache time-to-live, in seconds, from the moment of write.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            upstream_timeout_secs: default_upstream_timeout_secs(),
            archive_read_budget_secs: default_archive_read_budget_secs(),
            copy_budget_secs: default_copy_budget_secs(),
            cache_capacity_mb: default_cache_capacity_mb(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl MirrorConfig {
    /// Parse configuration from TOML text, falling back to defaults for
    /// any field the document omits.
    ///
    /// # Errors
    ///
    /// Returns an error if `content` is not valid TOML or doesn't match
    /// this struct's shape.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply environment-variable overrides on top of an already-loaded
    /// configuration, mirroring `apl-core`'s `*_from_env` convention. Each
    /// variable is optional; an unset or unparseable variable leaves the
    /// existing field untouched.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_u64("MIRROR_UPSTREAM_TIMEOUT_SECS") {
            self.upstream_timeout_secs = v;
        }
        if let Some(v) = env_u64("MIRROR_ARCHIVE_READ_BUDGET_SECS") {
            self.archive_read_budget_secs = v;
        }
        if let Some(v) = env_u64("MIRROR_COPY_BUDGET_SECS") {
            self.copy_budget_secs = v;
        }
        if let Some(v) = env_u64("MIRROR_CACHE_CAPACITY_MB") {
            self.cache_capacity_mb = v;
        }
        if let Some(v) = env_u64("MIRROR_CACHE_TTL_SECS") {
            self.cache_ttl_secs = v;
        }
        self
    }

    /// The per-upstream-call deadline as a [`Duration`].
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    /// The per-archive-download body-read budget as a [`Duration`].
    pub fn archive_read_budget(&self) -> Duration {
        Duration::from_secs(self.archive_read_budget_secs)
    }

    /// The total per-copy wall-clock budget as a [`Duration`].
    pub fn copy_budget(&self) -> Duration {
        Duration::from_secs(self.copy_budget_secs)
    }

    /// The per-entry cache TTL as a [`Duration`].
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
