//! Image content manifests.
//!
//! A content manifest lists what a container image built from the bundle
//! contains, as package URLs:
//!
//! ```json
//! {
//!   "image_contents": [
//!     {"dependencies": [{"purl": "pkg:npm/async@3.2.0"}], "purl": "pkg:npm/web@1.0.0", "sources": []}
//!   ],
//!   "metadata": {"icm_spec": "...", "icm_version": 1, "image_layer_index": -1}
//! }
//! ```

use crate::canonical::deep_sort;
use crate::packages::{Package, PackageType};
use serde_json::{json, Value};
use std::collections::BTreeSet;

pub const ICM_VERSION: u32 = 1;

pub const ICM_SPEC: &str = "https://raw.githubusercontent.com/containerbuildsystem/atomic-reactor/master/atomic_reactor/schemas/content_manifest.json";

/// Package URL of a package or dependency.
#[must_use]
pub fn purl(kind: PackageType, name: &str, version: &str) -> String {
    match kind {
        PackageType::Npm | PackageType::Yarn => {
            format!("pkg:npm/{}@{}", name.replace('@', "%40"), encode(version))
        }
        PackageType::Gomod | PackageType::GoPackage => {
            format!("pkg:golang/{}@{}", name, encode(version))
        }
        PackageType::Pip => {
            format!("pkg:pypi/{}@{}", pypi_name(name), encode(version))
        }
        PackageType::GitSubmodule => {
            format!("pkg:generic/{}@{}", encode(name), encode(version))
        }
    }
}

/// PEP 503 normalized name.
fn pypi_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut last_dash = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !last_dash {
                normalized.push('-');
            }
            last_dash = true;
        } else {
            normalized.extend(c.to_lowercase());
            last_dash = false;
        }
    }
    normalized
}

fn encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Build the deep-sorted content manifest of `packages`.
#[must_use]
pub fn build_content_manifest(packages: &[Package]) -> Value {
    let contents: Vec<Value> = packages
        .iter()
        .map(|package| {
            let dependencies: BTreeSet<String> = package
                .dependencies
                .iter()
                .map(|dep| purl(dep.kind, &dep.name, &dep.version))
                .collect();
            json!({
                "purl": purl(package.kind, &package.name, &package.version),
                "dependencies": dependencies
                    .into_iter()
                    .map(|purl| json!({ "purl": purl }))
                    .collect::<Vec<_>>(),
                "sources": [],
            })
        })
        .collect();

    deep_sort(json!({
        "metadata": {
            "icm_version": ICM_VERSION,
            "icm_spec": ICM_SPEC,
            "image_layer_index": -1,
        },
        "image_contents": contents,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::Dependency;

    fn package(name: &str, kind: PackageType, version: &str, deps: Vec<Dependency>) -> Package {
        Package {
            name: name.to_string(),
            kind,
            version: version.to_string(),
            path: None,
            dev: None,
            dependencies: deps,
        }
    }

    #[test]
    fn test_purls() {
        assert_eq!(purl(PackageType::Npm, "async", "3.2.0"), "pkg:npm/async@3.2.0");
        assert_eq!(
            purl(PackageType::Yarn, "@babel/core", "7.0.0"),
            "pkg:npm/%40babel/core@7.0.0"
        );
        assert_eq!(
            purl(PackageType::Gomod, "golang.org/x/text", "v0.3.0"),
            "pkg:golang/golang.org/x/text@v0.3.0"
        );
        assert_eq!(
            purl(PackageType::Pip, "Django_REST.framework", "3.12.0"),
            "pkg:pypi/django-rest-framework@3.12.0"
        );
        assert_eq!(
            purl(PackageType::Npm, "tarball", "https://x/y.tgz"),
            "pkg:npm/tarball@https%3A%2F%2Fx%2Fy.tgz"
        );
    }

    #[test]
    fn test_manifest_shape() {
        let manifest = build_content_manifest(&[package(
            "web",
            PackageType::Npm,
            "1.0.0",
            vec![
                Dependency::new("zod", PackageType::Npm, "3.0.0"),
                Dependency::new("async", PackageType::Npm, "3.2.0"),
                Dependency::new("async", PackageType::Npm, "3.2.0").dev(),
            ],
        )]);

        assert_eq!(manifest["metadata"]["icm_version"], 1);
        assert_eq!(manifest["metadata"]["image_layer_index"], -1);
        let contents = manifest["image_contents"].as_array().unwrap();
        assert_eq!(contents[0]["purl"], "pkg:npm/web@1.0.0");
        assert_eq!(
            contents[0]["dependencies"],
            json!([{"purl": "pkg:npm/async@3.2.0"}, {"purl": "pkg:npm/zod@3.0.0"}])
        );
        assert_eq!(contents[0]["sources"], json!([]));
    }

    #[test]
    fn test_manifest_independent_of_package_order() {
        let a = package("a", PackageType::Pip, "1", vec![]);
        let b = package("b", PackageType::Gomod, "v1", vec![]);

        let first = build_content_manifest(&[a.clone(), b.clone()]);
        let second = build_content_manifest(&[b, a]);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_empty_manifest() {
        let manifest = build_content_manifest(&[]);
        assert_eq!(manifest["image_contents"], json!([]));
    }
}
