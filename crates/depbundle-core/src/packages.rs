//! Package and dependency accumulation for a single request.
//!
//! A [`PackagesData`] is built stage by stage while a request's pipeline
//! runs, persisted to `packages.json` in the request's working directory and
//! reloaded by later stages.
//!
//! ## File Format
//!
//! ```json
//! {
//!   "packages": [
//!     {
//!       "name": "my-app",
//!       "type": "npm",
//!       "version": "1.0.0",
//!       "path": "client",
//!       "dependencies": [
//!         { "name": "async", "type": "npm", "version": "3.2.0", "dev": true }
//!       ]
//!     }
//!   ]
//! }
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

/// Ecosystem tag carried by packages and dependencies.
///
/// Ordering in canonical output is by the tag string, not by variant order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PackageType {
    #[serde(rename = "gomod")]
    Gomod,
    #[serde(rename = "go-package")]
    GoPackage,
    #[serde(rename = "npm")]
    Npm,
    #[serde(rename = "pip")]
    Pip,
    #[serde(rename = "yarn")]
    Yarn,
    #[serde(rename = "git-submodule")]
    GitSubmodule,
}

impl PackageType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gomod => "gomod",
            Self::GoPackage => "go-package",
            Self::Npm => "npm",
            Self::Pip => "pip",
            Self::Yarn => "yarn",
            Self::GitSubmodule => "git-submodule",
        }
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Package description returned by a resolver, before it is placed in the
/// accumulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PackageType,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev: Option<bool>,
}

/// One resolved project unit with its dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PackageType,
    pub version: String,
    /// Location relative to the source root. Absent means the root itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev: Option<bool>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

impl Package {
    #[must_use]
    pub fn is_dev(&self) -> bool {
        self.dev.unwrap_or(false)
    }
}

/// A third-party unit a package depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PackageType,
    pub version: String,
    /// The dependency this one supersedes (replacement/override semantics).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaces: Option<DependencyRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev: Option<bool>,
}

impl Dependency {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: PackageType, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            version: version.into(),
            replaces: None,
            dev: None,
        }
    }

    /// Mark as a dev-only dependency.
    #[must_use]
    pub fn dev(mut self) -> Self {
        self.dev = Some(true);
        self
    }

    /// Record the dependency this one replaces.
    #[must_use]
    pub fn replacing(mut self, replaced: DependencyRef) -> Self {
        self.replaces = Some(replaced);
        self
    }

    #[must_use]
    pub fn is_dev(&self) -> bool {
        self.dev.unwrap_or(false)
    }
}

/// Back-reference to a replaced dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PackageType,
    pub version: String,
}

type PackageKey<'a> = (&'a str, PackageType, &'a str, Option<&'a str>);

/// Ordered accumulation of packages for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagesData {
    packages: Vec<Package>,
}

impl PackagesData {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a package with its dependencies.
    ///
    /// `path` is relative to the source root; `"."` and `""` mean the root
    /// and are not recorded. On error the accumulation is left untouched.
    pub fn add_package(
        &mut self,
        info: PackageInfo,
        path: &str,
        dependencies: Vec<Dependency>,
    ) -> Result<()> {
        if info.name.trim().is_empty() {
            return Err(Error::validation("The package name must not be empty"));
        }
        if info.version.trim().is_empty() {
            return Err(Error::validation(format!(
                "The version of package {} must not be empty",
                info.name
            )));
        }

        let path = normalize_path(path);
        let key: PackageKey<'_> = (
            info.name.as_str(),
            info.kind,
            info.version.as_str(),
            path.as_deref(),
        );
        if self.packages.iter().any(|p| package_key(p) == key) {
            return Err(Error::DuplicatePackage {
                name: info.name,
                kind: info.kind.to_string(),
                version: info.version,
                path: path.unwrap_or_else(|| ".".to_string()),
            });
        }

        self.packages.push(Package {
            name: info.name,
            kind: info.kind,
            version: info.version,
            path,
            dev: info.dev,
            dependencies,
        });
        Ok(())
    }

    #[must_use]
    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Every dependency of every package, deduplicated by
    /// `(name, type, version)` in first-seen order, without `replaces`.
    #[must_use]
    pub fn all_dependencies(&self) -> Vec<Dependency> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();

        for dep in self.packages.iter().flat_map(|p| &p.dependencies) {
            if seen.insert((dep.name.as_str(), dep.kind, dep.version.as_str())) {
                result.push(Dependency {
                    replaces: None,
                    ..dep.clone()
                });
            }
        }

        result
    }

    /// Serialize the accumulation to `path` as `{"packages": [...]}`.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let mut content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::store(format!("Failed to serialize packages data: {e}")))?;
        content.push('\n');
        depbundle_util::fs::atomic_write(path, content.as_bytes())?;
        Ok(())
    }

    /// Load an accumulation written by [`write_to_file`](Self::write_to_file).
    ///
    /// A missing file, invalid JSON or a document without a `"packages"` key
    /// yields an empty accumulation. Entries under `"packages"` that do not
    /// decode are an error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no packages data, starting empty");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        let value: serde_json::Value = match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "unparseable packages data, starting empty");
                return Ok(Self::default());
            }
        };

        let Some(packages) = value.get("packages") else {
            debug!(path = %path.display(), "packages data has no packages key, starting empty");
            return Ok(Self::default());
        };

        let packages: Vec<Package> = serde_json::from_value(packages.clone()).map_err(|e| {
            Error::validation(format!(
                "Invalid packages data at {}: {e}",
                path.display()
            ))
        })?;

        Ok(Self { packages })
    }
}

fn package_key(package: &Package) -> PackageKey<'_> {
    (
        package.name.as_str(),
        package.kind,
        package.version.as_str(),
        package.path.as_deref(),
    )
}

fn normalize_path(path: &str) -> Option<String> {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == "./" {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn info(name: &str, kind: PackageType, version: &str) -> PackageInfo {
        PackageInfo {
            name: name.to_string(),
            kind,
            version: version.to_string(),
            dev: None,
        }
    }

    #[test]
    fn test_add_package_records_path() {
        let mut pd = PackagesData::new();
        pd.add_package(info("pkg1", PackageType::Gomod, "1.0.0"), "path1", vec![])
            .unwrap();

        assert_eq!(pd.len(), 1);
        assert_eq!(pd.packages()[0].path.as_deref(), Some("path1"));
        assert!(pd.packages()[0].dependencies.is_empty());
    }

    #[test]
    fn test_add_package_root_path_is_omitted() {
        let mut pd = PackagesData::new();
        pd.add_package(
            info("pkg3", PackageType::Npm, "1.2.3"),
            ".",
            vec![Dependency::new("async", PackageType::Npm, "15.0.0")],
        )
        .unwrap();

        let json = serde_json::to_value(&pd).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "packages": [{
                    "name": "pkg3",
                    "type": "npm",
                    "version": "1.2.3",
                    "dependencies": [{"name": "async", "type": "npm", "version": "15.0.0"}]
                }]
            })
        );
    }

    #[test]
    fn test_add_package_preserves_insertion_order() {
        let mut pd = PackagesData::new();
        pd.add_package(info("b", PackageType::Yarn, "2.3.1"), ".", vec![])
            .unwrap();
        pd.add_package(info("a", PackageType::Gomod, "1.0.0"), ".", vec![])
            .unwrap();

        let names: Vec<&str> = pd.packages().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_duplicate_package_leaves_state_untouched() {
        let mut pd = PackagesData::new();
        pd.add_package(info("pkg1", PackageType::Gomod, "1.0.0"), "path1", vec![])
            .unwrap();
        let before = pd.clone();

        let err = pd
            .add_package(
                info("pkg1", PackageType::Gomod, "1.0.0"),
                "path1",
                vec![Dependency::new(
                    "golang.org/x/text/internal/tag",
                    PackageType::GoPackage,
                    "v0.3.0",
                )],
            )
            .unwrap_err();

        assert!(matches!(err, Error::DuplicatePackage { .. }));
        assert!(err.to_string().contains("Duplicate package"));
        assert_eq!(pd, before);
    }

    #[test]
    fn test_same_package_different_path_is_allowed() {
        let mut pd = PackagesData::new();
        pd.add_package(info("pkg1", PackageType::Gomod, "1.0.0"), ".", vec![])
            .unwrap();
        pd.add_package(info("pkg1", PackageType::Gomod, "1.0.0"), "somewhere/", vec![])
            .unwrap();
        assert_eq!(pd.len(), 2);
    }

    #[test]
    fn test_dot_and_empty_path_are_the_same_key() {
        let mut pd = PackagesData::new();
        pd.add_package(info("pkg1", PackageType::Npm, "1.0.0"), ".", vec![])
            .unwrap();
        let err = pd
            .add_package(info("pkg1", PackageType::Npm, "1.0.0"), "", vec![])
            .unwrap_err();
        assert!(matches!(err, Error::DuplicatePackage { .. }));
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut pd = PackagesData::new();
        let err = pd
            .add_package(info("", PackageType::Npm, "1.0.0"), ".", vec![])
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(pd.is_empty());
    }

    #[test]
    fn test_write_to_file() {
        let dir = tempdir().unwrap();
        let filename = dir.path().join("data.json");

        let mut pd = PackagesData::new();
        pd.add_package(info("pkg1", PackageType::Gomod, "1.0.0"), "path1", vec![])
            .unwrap();
        pd.add_package(
            info("pkg3", PackageType::Npm, "1.2.3"),
            ".",
            vec![Dependency::new("async", PackageType::Npm, "15.0.0")],
        )
        .unwrap();
        pd.write_to_file(&filename).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&filename).unwrap()).unwrap();
        assert_eq!(
            written,
            serde_json::json!({
                "packages": [
                    {"name": "pkg1", "type": "gomod", "version": "1.0.0", "path": "path1", "dependencies": []},
                    {
                        "name": "pkg3", "type": "npm", "version": "1.2.3",
                        "dependencies": [{"name": "async", "type": "npm", "version": "15.0.0"}]
                    }
                ]
            })
        );
    }

    #[test]
    fn test_write_empty() {
        let dir = tempdir().unwrap();
        let filename = dir.path().join("data.json");
        PackagesData::new().write_to_file(&filename).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&filename).unwrap()).unwrap();
        assert_eq!(written, serde_json::json!({"packages": []}));
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let pd = PackagesData::load(&dir.path().join("data.json")).unwrap();
        assert!(pd.is_empty());
    }

    #[test]
    fn test_load_without_packages_key_is_empty() {
        let dir = tempdir().unwrap();
        let filename = dir.path().join("data.json");

        for content in ["{}", r#"{"data": []}"#, "not json", "[]"] {
            fs::write(&filename, content).unwrap();
            let pd = PackagesData::load(&filename).unwrap();
            assert!(pd.is_empty(), "expected empty accumulation for {content}");
        }
    }

    #[test]
    fn test_load_with_undecodable_entries_fails() {
        let dir = tempdir().unwrap();
        let filename = dir.path().join("data.json");
        fs::write(&filename, r#"{"packages": [{"name": "async@15.0.0"}]}"#).unwrap();

        let err = PackagesData::load(&filename).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_round_trip_is_byte_identical() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("first.json");
        let second = dir.path().join("second.json");

        let mut pd = PackagesData::new();
        pd.add_package(
            PackageInfo {
                dev: Some(true),
                ..info("web", PackageType::Yarn, "0.1.0")
            },
            "web",
            vec![
                Dependency::new("left-pad", PackageType::Yarn, "1.3.0").dev(),
                Dependency::new("golang.org/x/net", PackageType::Gomod, "v0.1.0").replacing(
                    DependencyRef {
                        name: "golang.org/x/net".to_string(),
                        kind: PackageType::Gomod,
                        version: "v0.0.9".to_string(),
                    },
                ),
            ],
        )
        .unwrap();
        pd.write_to_file(&first).unwrap();

        PackagesData::load(&first)
            .unwrap()
            .write_to_file(&second)
            .unwrap();

        assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
    }

    #[test]
    fn test_all_dependencies_without_dependencies() {
        let mut pd = PackagesData::new();
        pd.add_package(info("n2", PackageType::GoPackage, "v2"), ".", vec![])
            .unwrap();
        pd.add_package(info("n1", PackageType::Gomod, "v1"), ".", vec![])
            .unwrap();
        assert!(pd.all_dependencies().is_empty());
    }

    #[test]
    fn test_all_dependencies_dedupes_across_packages() {
        let replaced = DependencyRef {
            name: "d2".to_string(),
            kind: PackageType::Gomod,
            version: "1".to_string(),
        };

        let mut pd = PackagesData::new();
        pd.add_package(
            info("n2", PackageType::GoPackage, "v2"),
            ".",
            vec![
                Dependency::new("d1", PackageType::GoPackage, "1"),
                Dependency::new("d2", PackageType::GoPackage, "2"),
            ],
        )
        .unwrap();
        pd.add_package(
            info("n1", PackageType::Gomod, "v1"),
            ".",
            vec![
                Dependency::new("d1", PackageType::Gomod, "1"),
                Dependency::new("d2", PackageType::Gomod, "2").replacing(replaced),
            ],
        )
        .unwrap();
        pd.add_package(
            info("p1", PackageType::Npm, "v2"),
            ".",
            vec![Dependency::new("async", PackageType::Npm, "1.2.0")],
        )
        .unwrap();
        pd.add_package(
            info("p2", PackageType::Npm, "20210621"),
            ".",
            vec![
                Dependency::new("async", PackageType::Npm, "1.2.0"),
                Dependency::new("underscore", PackageType::Npm, "1.13.0"),
            ],
        )
        .unwrap();

        assert_eq!(
            pd.all_dependencies(),
            vec![
                Dependency::new("d1", PackageType::GoPackage, "1"),
                Dependency::new("d2", PackageType::GoPackage, "2"),
                Dependency::new("d1", PackageType::Gomod, "1"),
                // replaces is dropped from the flattened view
                Dependency::new("d2", PackageType::Gomod, "2"),
                // Only one async in the final dependencies list
                Dependency::new("async", PackageType::Npm, "1.2.0"),
                Dependency::new("underscore", PackageType::Npm, "1.13.0"),
            ]
        );
    }

    #[test]
    fn test_all_dependencies_same_name_different_paths() {
        let mut pd = PackagesData::new();
        pd.add_package(
            info("app", PackageType::Npm, "1.0.0"),
            ".",
            vec![Dependency::new("async", PackageType::Npm, "1.2.0")],
        )
        .unwrap();
        pd.add_package(
            info("app", PackageType::Npm, "1.0.0"),
            "nested",
            vec![
                Dependency::new("async", PackageType::Npm, "1.2.0"),
                Dependency::new("async", PackageType::Npm, "2.0.0"),
            ],
        )
        .unwrap();

        let deps = pd.all_dependencies();
        assert_eq!(
            deps,
            vec![
                Dependency::new("async", PackageType::Npm, "1.2.0"),
                Dependency::new("async", PackageType::Npm, "2.0.0"),
            ]
        );
    }
}
