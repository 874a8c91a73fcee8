use crate::pkg_managers::PackageManagerKind;
use crate::version::SCHEMA_VERSION;
use std::path::{Path, PathBuf};

/// Environment variable to override the bundles directory.
pub const BUNDLES_DIR_ENV: &str = "DEPBUNDLE_BUNDLES_DIR";

/// Name of the application source directory, both on disk and in the archive.
pub const SOURCE_DIR_NAME: &str = "app";

/// Get the default bundles directory for depbundle.
///
/// Uses platform-appropriate locations with versioning:
/// - Linux: `$XDG_DATA_HOME/depbundle/v{N}/bundles` or `~/.local/share/depbundle/v{N}/bundles`
/// - macOS: `~/Library/Application Support/depbundle/v{N}/bundles`
/// - Windows: `%LOCALAPPDATA%\depbundle\v{N}\bundles`
#[must_use]
pub fn default_bundles_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(BUNDLES_DIR_ENV) {
        return PathBuf::from(dir);
    }

    let base = dirs_next::data_dir().map_or_else(
        || {
            dirs_next::home_dir().map_or_else(
                || PathBuf::from(".depbundle-data"),
                |p| p.join(".local").join("share").join("depbundle"),
            )
        },
        |p| p.join("depbundle"),
    );

    base.join(format!("v{SCHEMA_VERSION}")).join("bundles")
}

/// On-disk layout of everything produced for one request.
///
/// ```text
/// <bundles>/temp/<id>/app/              fetched application source
/// <bundles>/temp/<id>/deps/<pm>/        populated dependency cache per package manager
/// <bundles>/temp/<id>/packages.json     PackagesData accumulation
/// <bundles>/locks/<id>.lock             held while a pipeline runs the request
/// <bundles>/<id>.tar.gz                 final archive
/// <bundles>/<id>-packages.json          canonical package metadata
/// <bundles>/<id>-content-manifest.json  image content manifest
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBundleDir {
    request_id: u64,
    bundles_dir: PathBuf,
    root: PathBuf,
}

impl RequestBundleDir {
    #[must_use]
    pub fn new(bundles_dir: &Path, request_id: u64) -> Self {
        Self {
            request_id,
            bundles_dir: bundles_dir.to_path_buf(),
            root: bundles_dir.join("temp").join(request_id.to_string()),
        }
    }

    #[must_use]
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// The per-request working directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn source_dir(&self) -> PathBuf {
        self.root.join(SOURCE_DIR_NAME)
    }

    #[must_use]
    pub fn deps_root(&self) -> PathBuf {
        self.root.join("deps")
    }

    /// Dependency cache directory for one package manager.
    #[must_use]
    pub fn deps_dir(&self, kind: PackageManagerKind) -> PathBuf {
        self.deps_root().join(kind.as_str())
    }

    #[must_use]
    pub fn packages_data(&self) -> PathBuf {
        self.root.join("packages.json")
    }

    /// Lives outside the working directory, which is wiped on every run.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.bundles_dir
            .join("locks")
            .join(format!("{}.lock", self.request_id))
    }

    #[must_use]
    pub fn archive_path(&self) -> PathBuf {
        self.bundles_dir.join(format!("{}.tar.gz", self.request_id))
    }

    #[must_use]
    pub fn packages_metadata_path(&self) -> PathBuf {
        self.bundles_dir
            .join(format!("{}-packages.json", self.request_id))
    }

    #[must_use]
    pub fn content_manifest_path(&self) -> PathBuf {
        self.bundles_dir
            .join(format!("{}-content-manifest.json", self.request_id))
    }
}
