//! Repository configuration.
//!
//! The `config` file at the repository root is TOML with a `[core]` table
//! and optional `[remotes.<name>]` tables. The same format is served by
//! remote repositories at `/config`, where only `[core]` matters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::RepoError;

/// Storage mode of a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepoMode {
    /// File objects stored as raw canonical content streams.
    #[serde(rename = "bare")]
    Bare,
    /// File objects stored standalone with zlib-compressed bodies; the
    /// only mode remote repositories may serve.
    #[serde(rename = "archive-z2")]
    ArchiveZ2,
}

impl RepoMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoMode::Bare => "bare",
            RepoMode::ArchiveZ2 => "archive-z2",
        }
    }

    pub fn is_archive(&self) -> bool {
        matches!(self, RepoMode::ArchiveZ2)
    }
}

impl fmt::Display for RepoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    pub core: CoreConfig,
    #[serde(default)]
    pub remotes: BTreeMap<String, RemoteConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(rename = "repo-version", default = "default_repo_version")]
    pub repo_version: u32,
    pub mode: RepoMode,
}

fn default_repo_version() -> u32 {
    1
}

/// A configured remote: where to pull from and how much to trust it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub url: String,
    /// Require a valid commit signature for every commit pulled.
    #[serde(default)]
    pub verify: bool,
    /// Require a signed summary before pulling anything.
    #[serde(rename = "verify-summary", default)]
    pub verify_summary: bool,
    /// Branches pulled when no explicit refs are given.
    #[serde(default)]
    pub branches: Vec<String>,
    /// Metalink URL resolved in place of `url` when set.
    #[serde(default)]
    pub metalink: Option<String>,
}

impl RepoConfig {
    pub fn new(mode: RepoMode) -> Self {
        Self {
            core: CoreConfig {
                repo_version: default_repo_version(),
                mode,
            },
            remotes: BTreeMap::new(),
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, RepoError> {
        Ok(toml::from_str(s)?)
    }

    pub fn to_toml_string(&self) -> Result<String, RepoError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_roundtrip() {
        let mut config = RepoConfig::new(RepoMode::ArchiveZ2);
        config.remotes.insert(
            "origin".to_string(),
            RemoteConfig {
                url: "https://builds.example.com/repo".to_string(),
                verify: true,
                verify_summary: true,
                branches: vec!["stable".to_string()],
                metalink: None,
            },
        );

        let text = config.to_toml_string().unwrap();
        let parsed = RepoConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.core.mode, RepoMode::ArchiveZ2);
        let origin = &parsed.remotes["origin"];
        assert!(origin.verify);
        assert_eq!(origin.branches, ["stable"]);
    }

    #[test]
    fn minimal_remote_config() {
        let parsed = RepoConfig::from_toml_str(
            "[core]\nrepo-version = 1\nmode = \"archive-z2\"\n",
        )
        .unwrap();
        assert_eq!(parsed.core.mode, RepoMode::ArchiveZ2);
        assert!(parsed.remotes.is_empty());
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(RepoConfig::from_toml_str("[core]\nmode = \"bare-user\"\n").is_err());
    }
}
