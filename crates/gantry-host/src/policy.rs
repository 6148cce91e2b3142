//! Startup auto-load policy

use std::collections::BTreeSet;

use gantry_api::ModuleId;
use thiserror::Error;

use crate::config::ModulesConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("whitelist_modules and blacklist_modules are mutually exclusive")]
    ConflictingLists,
}

/// Decides which loadable modules are loaded at startup
///
/// With a whitelist only listed modules are eligible; with a blacklist every
/// module except the listed ones is. The loader module is never eligible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoLoadPolicy {
    pub whitelist: Option<BTreeSet<ModuleId>>,
    pub blacklist: Option<BTreeSet<ModuleId>>,
    pub loader: Option<ModuleId>,
}

fn to_set(ids: &[String]) -> BTreeSet<ModuleId> {
    ids.iter().map(|id| ModuleId::new(id.as_str())).collect()
}

impl AutoLoadPolicy {
    /// Everything except the loader
    pub fn all() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ModulesConfig) -> Result<Self, PolicyError> {
        if config.whitelist_modules.is_some() && config.blacklist_modules.is_some() {
            return Err(PolicyError::ConflictingLists);
        }

        Ok(Self {
            whitelist: config.whitelist_modules.as_deref().map(to_set),
            blacklist: config.blacklist_modules.as_deref().map(to_set),
            loader: config.loader.as_deref().map(ModuleId::new),
        })
    }

    pub fn eligible(&self, id: &ModuleId) -> bool {
        if self.loader.as_ref() == Some(id) {
            return false;
        }
        if let Some(whitelist) = &self.whitelist {
            return whitelist.contains(id);
        }
        if let Some(blacklist) = &self.blacklist {
            return !blacklist.contains(id);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_excludes_loader() {
        let config = ModulesConfig {
            loader: Some("default-loader".into()),
            ..Default::default()
        };
        let policy = AutoLoadPolicy::from_config(&config).unwrap();
        assert!(policy.eligible(&"anything".into()));
        assert!(!policy.eligible(&"default-loader".into()));
    }

    #[test]
    fn test_whitelist() {
        let config = ModulesConfig {
            loader: Some("a".into()),
            whitelist_modules: Some(vec!["a".into(), "b".into()]),
            ..Default::default()
        };
        let policy = AutoLoadPolicy::from_config(&config).unwrap();
        assert!(policy.eligible(&"b".into()));
        assert!(!policy.eligible(&"c".into()));
        // the loader stays excluded even when whitelisted
        assert!(!policy.eligible(&"a".into()));
    }

    #[test]
    fn test_blacklist() {
        let config = ModulesConfig {
            blacklist_modules: Some(vec!["noisy".into()]),
            ..Default::default()
        };
        let policy = AutoLoadPolicy::from_config(&config).unwrap();
        assert!(!policy.eligible(&"noisy".into()));
        assert!(policy.eligible(&"quiet".into()));
    }

    #[test]
    fn test_both_lists_rejected() {
        let config = ModulesConfig {
            whitelist_modules: Some(vec![]),
            blacklist_modules: Some(vec![]),
            ..Default::default()
        };
        assert_eq!(
            AutoLoadPolicy::from_config(&config),
            Err(PolicyError::ConflictingLists)
        );
    }

    #[test]
    fn test_ids_are_not_normalised() {
        let config = ModulesConfig {
            whitelist_modules: Some(vec!["Greeter".into()]),
            ..Default::default()
        };
        let policy = AutoLoadPolicy::from_config(&config).unwrap();
        assert!(policy.eligible(&"Greeter".into()));
        assert!(!policy.eligible(&"greeter".into()));
    }
}
