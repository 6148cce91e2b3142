use std::borrow::Borrow;
use std::fmt;

/// Unique name of a module
///
/// Stable across reloads. Used as the key for `require` and for dependency edges.
/// The manager never normalises identifiers; two strings that differ only in case
/// name two different modules.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(String);

impl ModuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check the naming rule used for modules discovered on disk
    ///
    /// A name must be non-empty and must not contain `/`, `\`, a space or a `.`
    pub fn is_valid_name(name: &str) -> bool {
        !name.is_empty() && !name.chars().any(|c| matches!(c, '/' | '\\' | ' ' | '.'))
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ModuleId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ModuleId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ModuleId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ModuleId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl PartialEq<str> for ModuleId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ModuleId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_valid_names() {
        assert!(ModuleId::is_valid_name("mc-bukkit-command"));
        assert!(ModuleId::is_valid_name("auto_login"));
        assert!(ModuleId::is_valid_name("Loader2"));
    }

    #[test]
    fn test_invalid_names() {
        assert!(!ModuleId::is_valid_name(""));
        assert!(!ModuleId::is_valid_name("index.js"));
        assert!(!ModuleId::is_valid_name("a b"));
        assert!(!ModuleId::is_valid_name("../escape"));
        assert!(!ModuleId::is_valid_name("dir\\file"));
    }

    #[test]
    fn test_lookup_by_str() {
        let mut map = HashMap::new();
        map.insert(ModuleId::new("a"), 1);
        assert_eq!(map.get("a"), Some(&1));
        assert_eq!(ModuleId::from("a"), "a");
    }
}
