use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Name of the optional configuration file inside the
/// project directory.
pub const CONFIG_FILE: &str = "crypto-ralph.toml";

/// Top-level configuration.
///
/// Loaded from `crypto-ralph.toml` in the project directory;
/// every field falls back to its default when the file or the
/// field is absent.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct RalphConfig {
    pub paths: PathsConfig,
    pub mining: MiningConfig,
    pub agent: AgentConfig
}

/// Project file locations, relative to the project directory.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub prd_file: String,
    pub ledger_file: String,
    pub index_file: String,
    pub merkle_file: String,
    pub scan_directory: String,
    pub scan_extension: String
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            prd_file: String::from("PRD.json"),
            ledger_file: String::from("progress.txt"),
            index_file: String::from("output/document_index.json"),
            merkle_file: String::from("output/merkle_tree.json"),
            scan_directory: String::from("documents"),
            scan_extension: String::from("md")
        }
    }
}

/// Mining limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct MiningConfig {
    /// Abort proof-of-work searches after this many nonces.
    /// Unbounded when unset.
    pub max_nonce: Option<u64>
}

/// Agent behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Mark stories complete in the PRD after their block
    /// is appended.
    pub update_prd: bool
}

impl RalphConfig {
    /// Load configuration from `crypto-ralph.toml` in the given
    /// directory. Returns defaults if the file doesn't exist.
    pub fn load(project_dir: &Path) -> Self {
        let config_path = project_dir.join(CONFIG_FILE);

        match std::fs::read_to_string(&config_path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    tracing::info!(path = %config_path.display(), "loaded config");

                    config
                }

                Err(err) => {
                    tracing::warn!(
                        path = %config_path.display(),
                        error = %err,
                        "failed to parse config, using defaults"
                    );

                    Self::default()
                }
            },

            Err(_) => Self::default()
        }
    }
}

/// A project directory with its resolved configuration.
///
/// The original scripts hardcoded absolute paths; all path
/// decisions live here instead and the rest of the crate
/// receives them explicitly.
#[derive(Debug, Clone)]
pub struct Project {
    dir: PathBuf,
    config: RalphConfig
}

impl Project {
    /// Open a project directory, reading its optional
    /// configuration file.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let config = RalphConfig::load(&dir);

        Self {
            dir,
            config
        }
    }

    /// Build a project with an explicit configuration.
    pub fn with_config(dir: impl Into<PathBuf>, config: RalphConfig) -> Self {
        Self {
            dir: dir.into(),
            config
        }
    }

    #[inline]
    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    #[inline]
    pub fn config(&self) -> &RalphConfig {
        &self.config
    }

    #[inline]
    pub fn prd_file(&self) -> PathBuf {
        self.dir.join(&self.config.paths.prd_file)
    }

    #[inline]
    pub fn ledger_file(&self) -> PathBuf {
        self.dir.join(&self.config.paths.ledger_file)
    }

    #[inline]
    pub fn index_file(&self) -> PathBuf {
        self.dir.join(&self.config.paths.index_file)
    }

    #[inline]
    pub fn merkle_file(&self) -> PathBuf {
        self.dir.join(&self.config.paths.merkle_file)
    }

    #[inline]
    pub fn scan_directory(&self) -> PathBuf {
        self.dir.join(&self.config.paths.scan_directory)
    }

    #[inline]
    pub fn scan_extension(&self) -> &str {
        &self.config.paths.scan_extension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RalphConfig::default();

        assert_eq!(config.paths.prd_file, "PRD.json");
        assert_eq!(config.paths.ledger_file, "progress.txt");
        assert_eq!(config.mining.max_nonce, None);
        assert!(!config.agent.update_prd);
    }

    #[test]
    fn parse_overrides() {
        let config: RalphConfig = toml::from_str(r#"
            [paths]
            ledger_file = "ledger/progress.txt"
            scan_extension = "txt"

            [mining]
            max_nonce = 5000000

            [agent]
            update_prd = true
        "#).unwrap();

        assert_eq!(config.paths.ledger_file, "ledger/progress.txt");
        assert_eq!(config.paths.scan_extension, "txt");

        // Untouched sections keep their defaults.
        assert_eq!(config.paths.prd_file, "PRD.json");

        assert_eq!(config.mining.max_nonce, Some(5_000_000));
        assert!(config.agent.update_prd);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let project = Project::open(
            std::env::temp_dir().join(".crypto-ralph.config-test.missing")
        );

        assert_eq!(project.config(), &RalphConfig::default());
        assert!(project.prd_file().ends_with("PRD.json"));
    }
}
