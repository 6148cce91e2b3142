use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use gantry_api::{DefinitionKind, ModuleDefinition, ModuleId};
use serde::Deserialize;
use tracing::{debug, warn};

use super::ModuleSource;

/// Module source backed by one directory (the module root)
///
/// Each direct child of the root is a candidate module:
/// - `<name>.js` is a script module
/// - `<name>.json` is a JSON module
/// - `<name>/` is a module when it holds a `package.json` with a `main` entry,
///   an `index.js` or an `index.json` (checked in that order)
///
/// `<name>` must satisfy [`ModuleId::is_valid_name`]. When several children map
/// to the same name the directory wins over `.js`, and `.js` over `.json`.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

#[derive(Debug, Deserialize)]
struct PackageJson {
    main: Option<String>,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The child of the root that defines `id`, following the same precedence
    /// as [`module_entries`]
    fn entry(&self, id: &ModuleId) -> Option<PathBuf> {
        if !ModuleId::is_valid_name(id.as_str()) {
            return None;
        }

        let dir = self.root.join(id.as_str());
        if dir.is_dir() && is_module_directory(&dir) {
            return Some(dir);
        }
        [format!("{}.js", id), format!("{}.json", id)]
            .into_iter()
            .map(|file| self.root.join(file))
            .find(|path| path.is_file())
    }
}

fn read_definition(
    id: &ModuleId,
    path: &Path,
    kind: DefinitionKind,
) -> io::Result<ModuleDefinition> {
    let source = fs::read_to_string(path)?;
    Ok(ModuleDefinition::new(id.clone(), kind, source).with_origin(path))
}

impl ModuleSource for DirectorySource {
    fn name(&self) -> &str {
        "directory"
    }

    fn identifiers(&self) -> Vec<ModuleId> {
        module_entries(&self.root).into_keys().collect()
    }

    fn contains(&self, id: &str) -> bool {
        self.entry(&ModuleId::new(id)).is_some()
    }

    fn definition(&self, id: &ModuleId) -> io::Result<Option<ModuleDefinition>> {
        let Some(path) = self.entry(id) else {
            return Ok(None);
        };
        match resolve_path(&path, true)? {
            Some((file, kind)) => read_definition(id, &file, kind).map(Some),
            None => Ok(None),
        }
    }
}

fn kind_for_path(path: &Path) -> Option<DefinitionKind> {
    match path.extension().and_then(|s| s.to_str()) {
        Some("js") => Some(DefinitionKind::Script),
        Some("json") => Some(DefinitionKind::Json),
        _ => None,
    }
}

/// The file a module directory starts from
///
/// `package.json` `main` first (only when `follow_package` is set), then
/// `index.js`, then `index.json`. A `package.json` that cannot be parsed, or
/// whose `main` does not exist, is an error rather than "no entry point".
fn entry_point(
    dir: &Path,
    follow_package: bool,
) -> io::Result<Option<(PathBuf, DefinitionKind)>> {
    let package_json = dir.join("package.json");
    if follow_package && package_json.is_file() {
        let content = fs::read_to_string(&package_json)?;
        let package: PackageJson = serde_json::from_str(&content).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Failed to parse {}: {}", package_json.display(), e),
            )
        })?;

        if let Some(main) = package.main {
            return match resolve_path(&dir.join(&main), false)? {
                Some(found) => Ok(Some(found)),
                None => Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("'{}' does not exist in the scope of package.json", main),
                )),
            };
        }
    }

    let index_js = dir.join("index.js");
    if index_js.is_file() {
        return Ok(Some((index_js, DefinitionKind::Script)));
    }

    let index_json = dir.join("index.json");
    if index_json.is_file() {
        return Ok(Some((index_json, DefinitionKind::Json)));
    }

    // A plain directory, not a module
    Ok(None)
}

/// Resolve a path the way module files are looked up
///
/// Directories go through their entry point. A path with a `.js` or `.json`
/// extension must exist as is; any other path is tried with `.js` and then
/// `.json` appended.
fn resolve_path(
    path: &Path,
    follow_package: bool,
) -> io::Result<Option<(PathBuf, DefinitionKind)>> {
    if path.is_dir() {
        return entry_point(path, follow_package);
    }
    if let Some(kind) = kind_for_path(path) {
        return Ok(path.is_file().then(|| (path.to_path_buf(), kind)));
    }

    let candidates = [(".js", DefinitionKind::Script), (".json", DefinitionKind::Json)];
    for (extension, kind) in candidates {
        let mut candidate = path.as_os_str().to_owned();
        candidate.push(extension);
        let candidate = PathBuf::from(candidate);
        if candidate.is_file() {
            return Ok(Some((candidate, kind)));
        }
    }
    Ok(None)
}

/// Whether `target` names a file relative to the requiring module rather than
/// a module identifier
pub(crate) fn is_relative_target(target: &str) -> bool {
    target.starts_with("./") || target.starts_with("../") || target.starts_with('/')
}

/// Resolve a relative `require` target against the file that requires it
///
/// Returns the file to evaluate and its kind, or `None` when nothing matches.
pub(crate) fn resolve_relative(
    origin: &Path,
    target: &str,
) -> io::Result<Option<(PathBuf, DefinitionKind)>> {
    let base = if origin.is_dir() {
        origin
    } else {
        origin.parent().unwrap_or(origin)
    };
    resolve_path(&base.join(target), true)
}

/// A directory is a module when it has an entry point; one whose
/// `package.json` is broken still counts so that loading it reports why
fn is_module_directory(dir: &Path) -> bool {
    !matches!(entry_point(dir, true), Ok(None))
}

/// Precedence of a child that maps to a module name; lower wins
fn precedence(path: &Path) -> u8 {
    if path.is_dir() {
        0
    } else if kind_for_path(path) == Some(DefinitionKind::Script) {
        1
    } else {
        2
    }
}

/// Map every loadable module under `root` to the child it is defined by
pub(crate) fn module_entries(root: &Path) -> BTreeMap<ModuleId, PathBuf> {
    let mut modules: BTreeMap<ModuleId, PathBuf> = BTreeMap::new();

    if !root.exists() {
        debug!(
            target: "modules",
            "Module directory does not exist: {}",
            root.display()
        );
        return modules;
    }

    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(
                target: "modules",
                "Failed to read module directory {}: {}",
                root.display(),
                e
            );
            return modules;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };

        let name = if path.is_dir() {
            if !is_module_directory(&path) {
                continue;
            }
            file_name
        } else if let Some(stem) = file_name
            .strip_suffix(".js")
            .or_else(|| file_name.strip_suffix(".json"))
        {
            stem
        } else {
            continue;
        };

        if !ModuleId::is_valid_name(name) {
            debug!(
                target: "modules",
                "Skipping {}: not a valid module name",
                path.display()
            );
            continue;
        }

        let id = ModuleId::new(name);
        let replace = modules
            .get(&id)
            .map_or(true, |existing| precedence(&path) < precedence(existing));
        if replace {
            modules.insert(id, path);
        }
    }

    modules
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        let mut file = File::create(path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn test_identifiers() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        write(&root.join("greeter.js"), "module.exports = 1;");
        write(&root.join("settings.json"), "{}");
        write(&root.join("notes.txt"), "ignored");
        write(&root.join("has.dot.js"), "ignored");

        fs::create_dir(root.join("bundle")).unwrap();
        write(&root.join("bundle").join("index.js"), "");
        fs::create_dir(root.join("empty")).unwrap();

        let source = DirectorySource::new(root);
        let ids: Vec<String> = source.identifiers().iter().map(|id| id.to_string()).collect();
        assert_eq!(ids, vec!["bundle", "greeter", "settings"]);
    }

    #[test]
    fn test_duplicate_names_deduplicated() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(&root.join("dup.js"), "js");
        write(&root.join("dup.json"), "{}");

        let source = DirectorySource::new(root);
        assert_eq!(source.identifiers().len(), 1);

        let definition = source.definition(&"dup".into()).unwrap().unwrap();
        assert_eq!(definition.kind, DefinitionKind::Script);
        assert_eq!(definition.source, "js");
    }

    #[test]
    fn test_package_json_main() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("pkg");
        fs::create_dir(&dir).unwrap();
        write(&dir.join("package.json"), r#"{"main": "lib.js"}"#);
        write(&dir.join("lib.js"), "main source");
        write(&dir.join("index.js"), "index source");

        let source = DirectorySource::new(temp_dir.path());
        let definition = source.definition(&"pkg".into()).unwrap().unwrap();
        assert_eq!(definition.source, "main source");
        assert_eq!(definition.origin, Some(dir.join("lib.js")));
    }

    #[test]
    fn test_package_json_without_main_falls_back_to_index() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("pkg");
        fs::create_dir(&dir).unwrap();
        write(&dir.join("package.json"), r#"{"name": "pkg"}"#);
        write(&dir.join("index.json"), r#"{"answer": 42}"#);

        let source = DirectorySource::new(temp_dir.path());
        let definition = source.definition(&"pkg".into()).unwrap().unwrap();
        assert_eq!(definition.kind, DefinitionKind::Json);
    }

    #[test]
    fn test_broken_package_json() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("pkg");
        fs::create_dir(&dir).unwrap();
        write(&dir.join("package.json"), "{ not json");

        let source = DirectorySource::new(temp_dir.path());
        let err = source.definition(&"pkg".into()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_missing_main() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("pkg");
        fs::create_dir(&dir).unwrap();
        write(&dir.join("package.json"), r#"{"main": "gone.js"}"#);

        let source = DirectorySource::new(temp_dir.path());
        let err = source.definition(&"pkg".into()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_unknown_and_invalid_ids() {
        let temp_dir = TempDir::new().unwrap();
        write(&temp_dir.path().join("real.json"), "{}");

        let source = DirectorySource::new(temp_dir.path());
        assert!(source.definition(&"missing".into()).unwrap().is_none());
        assert!(source.definition(&"../real".into()).unwrap().is_none());
    }

    #[test]
    fn test_package_json_without_entry_point_is_not_a_module() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("pkg");
        fs::create_dir(&dir).unwrap();
        write(&dir.join("package.json"), r#"{"name": "pkg"}"#);

        let source = DirectorySource::new(temp_dir.path());
        assert!(source.identifiers().is_empty());
        assert!(!source.contains("pkg"));
        assert!(source.definition(&"pkg".into()).unwrap().is_none());

        // A sibling file takes over the name
        write(&temp_dir.path().join("pkg.js"), "file source");
        assert_eq!(source.identifiers(), vec![ModuleId::new("pkg")]);
        assert!(source.contains("pkg"));
        let definition = source.definition(&"pkg".into()).unwrap().unwrap();
        assert_eq!(definition.source, "file source");
    }

    #[test]
    fn test_broken_package_json_is_still_listed() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("pkg");
        fs::create_dir(&dir).unwrap();
        write(&dir.join("package.json"), r#"{"main": "gone.js"}"#);

        let source = DirectorySource::new(temp_dir.path());
        assert_eq!(source.identifiers(), vec![ModuleId::new("pkg")]);
        assert!(source.contains("pkg"));
        assert!(source.definition(&"pkg".into()).is_err());
    }

    #[test]
    fn test_main_without_extension() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("pkg");
        fs::create_dir_all(dir.join("lib")).unwrap();
        write(&dir.join("package.json"), r#"{"main": "lib/start"}"#);
        write(&dir.join("lib").join("start.json"), "[1]");

        let source = DirectorySource::new(temp_dir.path());
        let definition = source.definition(&"pkg".into()).unwrap().unwrap();
        assert_eq!(definition.kind, DefinitionKind::Json);
        assert_eq!(definition.origin, Some(dir.join("lib").join("start.json")));
    }

    #[test]
    fn test_contains_matches_identifiers() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(&root.join("greeter.js"), "");
        write(&root.join("settings.json"), "{}");
        fs::create_dir(root.join("empty")).unwrap();

        let source = DirectorySource::new(root);
        assert!(source.contains("greeter"));
        assert!(source.contains("settings"));
        assert!(!source.contains("empty"));
        assert!(!source.contains("missing"));
        assert!(!source.contains("../greeter"));
    }

    #[test]
    fn test_resolve_relative() {
        let temp_dir = TempDir::new().unwrap();
        let app = temp_dir.path().join("app");
        fs::create_dir_all(app.join("helpers")).unwrap();
        write(&app.join("index.js"), "");
        write(&app.join("lib.js"), "");
        write(&app.join("data.json"), "{}");
        write(&app.join("helpers").join("index.js"), "");
        write(&temp_dir.path().join("shared.js"), "");

        let origin = app.join("index.js");
        let resolve = |target: &str| resolve_relative(&origin, target).unwrap();

        assert_eq!(resolve("./lib"), Some((app.join("lib.js"), DefinitionKind::Script)));
        assert_eq!(resolve("./data"), Some((app.join("data.json"), DefinitionKind::Json)));
        assert_eq!(resolve("./data.json"), Some((app.join("data.json"), DefinitionKind::Json)));
        assert_eq!(
            resolve("./helpers"),
            Some((app.join("helpers").join("index.js"), DefinitionKind::Script))
        );
        assert_eq!(
            resolve("../shared"),
            Some((app.join("..").join("shared.js"), DefinitionKind::Script))
        );
        assert_eq!(resolve("./missing"), None);

        assert!(is_relative_target("./lib"));
        assert!(is_relative_target("../lib"));
        assert!(is_relative_target("/abs/lib"));
        assert!(!is_relative_target("lib"));
    }

    #[test]
    fn test_handles_missing_directory() {
        let source = DirectorySource::new("/tmp/this_does_not_exist_gantry_12345");
        assert!(source.identifiers().is_empty());
    }
}
