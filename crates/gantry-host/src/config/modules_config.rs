use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::gantry_config::project_dirs;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModulesConfig {
    /// Directory containing modules (default: <data dir>/modules)
    #[serde(default)]
    pub module_dir: Option<PathBuf>,

    /// Module that drives startup loading; never auto-loaded itself
    #[serde(default)]
    pub loader: Option<String>,

    /// Only these modules are auto-loaded at startup
    #[serde(default)]
    pub whitelist_modules: Option<Vec<String>>,

    /// Every module except these is auto-loaded at startup
    #[serde(default)]
    pub blacklist_modules: Option<Vec<String>>,

    /// Whether hot reload is enabled (default: true)
    #[serde(default = "default_hot_reload")]
    pub hot_reload: bool,

    /// Hot reload scan interval in milliseconds (default: 1000ms)
    #[serde(default = "default_hot_reload_interval")]
    pub hot_reload_interval_ms: u64,
}

fn default_hot_reload() -> bool {
    true
}

fn default_hot_reload_interval() -> u64 {
    1000
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            module_dir: None,
            loader: None,
            whitelist_modules: None,
            blacklist_modules: None,
            hot_reload: true,
            hot_reload_interval_ms: 1000,
        }
    }
}

impl ModulesConfig {
    /// Get the module directory path (use provided or default)
    pub fn module_dir(&self) -> PathBuf {
        self.module_dir.clone().unwrap_or_else(|| {
            project_dirs()
                .map(|dirs| dirs.data_dir().join("modules"))
                .unwrap_or_else(|| PathBuf::from(".modules"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_table() {
        let config: ModulesConfig = toml::from_str("").unwrap();
        assert_eq!(config, ModulesConfig::default());
        assert!(config.hot_reload);
        assert_eq!(config.hot_reload_interval_ms, 1000);
    }

    #[test]
    fn test_explicit_module_dir() {
        let config: ModulesConfig = toml::from_str(r#"module_dir = "/srv/modules""#).unwrap();
        assert_eq!(config.module_dir(), PathBuf::from("/srv/modules"));
    }

    #[test]
    fn test_default_module_dir() {
        let dir = ModulesConfig::default().module_dir();
        assert!(dir.ends_with("modules"));
    }
}
