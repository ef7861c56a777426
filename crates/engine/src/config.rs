//! Engine configuration via `tubtrack.toml`
//!
//! Embedders keep one config file next to their data; on first start a
//! commented default is written. Unknown states in `closeout_states` are
//! rejected when the file is loaded, not when the first closeout runs.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tubtrack_core::{Error, Result, TubState};

/// Config file name
pub const CONFIG_FILE_NAME: &str = "tubtrack.toml";

/// Engine configuration loaded from `tubtrack.toml`.
///
/// # Example
///
/// ```toml
/// advisory_locks = true
/// publish_batches = true
/// derive_titles = true
/// closeout_states = ["Serving", "Opened"]
/// max_children = 10000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Serialize fan-out and closeout per parent across requests.
    #[serde(default = "default_true")]
    pub advisory_locks: bool,
    /// Mark a batch published once its tubs are created.
    #[serde(default = "default_true")]
    pub publish_batches: bool,
    /// Derive `title`/`slug` for new records that arrive without one.
    #[serde(default = "default_true")]
    pub derive_titles: bool,
    /// Tub states a closeout may retire.
    #[serde(default = "default_closeout_states")]
    pub closeout_states: Vec<String>,
    /// Largest number of tubs or slots one batch or cabinet may create.
    #[serde(default = "default_max_children")]
    pub max_children: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_children() -> usize {
    10_000
}

fn default_closeout_states() -> Vec<String> {
    vec![
        TubState::Serving.as_str().to_string(),
        TubState::Opened.as_str().to_string(),
    ]
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            advisory_locks: true,
            publish_batches: true,
            derive_titles: true,
            closeout_states: default_closeout_states(),
            max_children: default_max_children(),
        }
    }
}

impl EngineConfig {
    /// Parse `closeout_states` into tub states.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown names, for `Emptied`/`Override`, or for
    /// an empty list.
    pub fn closeout_states(&self) -> Result<Vec<TubState>> {
        if self.closeout_states.is_empty() {
            return Err(Error::Config(
                "closeout_states must name at least one state".to_string(),
            ));
        }
        self.closeout_states
            .iter()
            .map(|name| {
                let state: TubState = name
                    .parse()
                    .map_err(|e| Error::Config(format!("closeout_states: {}", e)))?;
                if matches!(state, TubState::Emptied | TubState::Override) {
                    return Err(Error::Config(format!(
                        "closeout_states: '{}' tubs cannot be closed out",
                        state
                    )));
                }
                Ok(state)
            })
            .collect()
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Tubtrack engine configuration
#
# Serialize fan-out and closeout processing per batch/cabinet/closeout across
# concurrent requests (default: true).
advisory_locks = true

# Mark a batch as published once its tubs have been created (default: true).
publish_batches = true

# Derive title and slug for new records submitted without a title (default: true).
derive_titles = true

# Tub states a closeout may retire, oldest first (default: Serving, Opened).
closeout_states = ["Serving", "Opened"]

# Largest number of tubs a batch, or slots a cabinet, may create. A larger
# count creates nothing (default: 10000).
max_children = 10000
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: EngineConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.closeout_states()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_states() {
        let config = EngineConfig::default();
        assert_eq!(
            config.closeout_states().unwrap(),
            vec![TubState::Serving, TubState::Opened]
        );
        assert!(config.advisory_locks);
    }

    #[test]
    fn default_toml_matches_default() {
        let config: EngineConfig = toml::from_str(EngineConfig::default_toml()).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn missing_keys_use_defaults() {
        let config: EngineConfig = toml::from_str("publish_batches = false").unwrap();
        assert!(!config.publish_batches);
        assert!(config.derive_titles);
        assert_eq!(config.closeout_states.len(), 2);
        assert_eq!(config.max_children, 10_000);
    }

    #[test]
    fn max_children_is_configurable() {
        let config: EngineConfig = toml::from_str("max_children = 12").unwrap();
        assert_eq!(config.max_children, 12);
    }

    #[test]
    fn rejects_unknown_or_terminal_states() {
        let config: EngineConfig = toml::from_str("closeout_states = [\"Melted\"]").unwrap();
        assert!(config.closeout_states().is_err());

        let config: EngineConfig = toml::from_str("closeout_states = [\"Emptied\"]").unwrap();
        assert!(config.closeout_states().is_err());

        let config: EngineConfig = toml::from_str("closeout_states = []").unwrap();
        assert!(config.closeout_states().is_err());
    }

    #[test]
    fn write_default_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        assert!(!path.exists());

        EngineConfig::write_default_if_missing(&path).unwrap();
        assert!(path.exists());

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn write_default_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "advisory_locks = false\n").unwrap();

        EngineConfig::write_default_if_missing(&path).unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert!(!config.advisory_locks);
    }

    #[test]
    fn from_file_rejects_invalid_states() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "closeout_states = [\"Override\"]\n").unwrap();
        assert!(matches!(EngineConfig::from_file(&path), Err(Error::Config(_))));
    }

    #[test]
    fn write_to_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = EngineConfig {
            closeout_states: vec!["Opened".to_string()],
            ..EngineConfig::default()
        };
        config.write_to_file(&path).unwrap();
        assert_eq!(EngineConfig::from_file(&path).unwrap(), config);
    }
}
