use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use super::modules_config::ModulesConfig;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not determine the config directory")]
    NoConfigDir,
}

pub(crate) fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "gantry")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GantryConfig {
    /// Also write logs to <data dir>/logs
    #[serde(default)]
    pub log_to_file: bool,

    /// Module loading configuration
    #[serde(default)]
    pub modules: ModulesConfig,
}

impl GantryConfig {
    pub fn config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from the default location
    pub fn load() -> Result<Self, ConfigLoadError> {
        let path = Self::config_path().ok_or(ConfigLoadError::NoConfigDir)?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigLoadError> {
        if !path.exists() {
            return Err(ConfigLoadError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        info!(target: "modules", "Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load from the default location, falling back to defaults when there is no file
    pub fn load_or_default() -> Result<Self, ConfigLoadError> {
        match Self::load() {
            Err(ConfigLoadError::NotFound(path)) => {
                info!(
                    target: "modules",
                    "No config at {}, using defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            other => other,
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(&self)?;
        fs::write(path, content)?;
        info!(target: "modules", "Saved config to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
log_to_file = true

[modules]
module_dir = "/srv/gantry"
loader = "default-loader"
blacklist_modules = ["noisy"]
hot_reload_interval_ms = 250
"#,
        )
        .unwrap();

        let config = GantryConfig::load_from(&path).unwrap();
        assert!(config.log_to_file);
        assert_eq!(config.modules.loader.as_deref(), Some("default-loader"));
        assert_eq!(config.modules.blacklist_modules, Some(vec!["noisy".to_string()]));
        assert_eq!(config.modules.hot_reload_interval_ms, 250);
        assert!(config.modules.hot_reload);
    }

    #[test]
    fn test_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = GantryConfig::load_from(&temp_dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigLoadError::NotFound(_)));
    }

    #[test]
    fn test_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[modules\nbroken").unwrap();

        let err = GantryConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Parse(_)));
    }

    #[test]
    fn test_save_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = GantryConfig::default();
        config.modules.whitelist_modules = Some(vec!["a".into(), "b".into()]);
        config.save_to(&path).unwrap();

        assert_eq!(GantryConfig::load_from(&path).unwrap(), config);
    }
}
