//! Per-ecosystem capabilities.
//!
//! Each package manager differs only in how its presence is detected, which
//! local cache it refuses, whether it needs a proxy grant, and the client
//! configuration handed to downstream builds. The pipeline drives all of
//! them through [`PackageManager`].

mod gomod;
mod js;
pub mod npmrc;
mod pip;

pub use gomod::Gomod;
pub use js::{Npm, Yarn};
pub use pip::Pip;

use crate::config::ProxyConfig;
use crate::error::{Error, Result};
use crate::packages::PackageType;
use crate::proxy::{FinalCredentials, ProxyFamily};
use crate::request::{ConfigFile, EnvVar};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Supported package manager tags.
///
/// Variant order is the auto-detection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManagerKind {
    Gomod,
    Npm,
    Pip,
    Yarn,
}

impl PackageManagerKind {
    pub const ALL: [PackageManagerKind; 4] = [Self::Gomod, Self::Npm, Self::Pip, Self::Yarn];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gomod => "gomod",
            Self::Npm => "npm",
            Self::Pip => "pip",
            Self::Yarn => "yarn",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// The capability implementation for this tag.
    #[must_use]
    pub fn manager(self) -> &'static dyn PackageManager {
        match self {
            Self::Gomod => &Gomod,
            Self::Npm => &Npm,
            Self::Pip => &Pip,
            Self::Yarn => &Yarn,
        }
    }
}

impl fmt::Display for PackageManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the pipeline needs to know about one ecosystem.
pub trait PackageManager: Send + Sync {
    fn kind(&self) -> PackageManagerKind;

    /// Type tag of the package this ecosystem resolves.
    fn package_type(&self) -> PackageType;

    /// Files marking a source tree as using this package manager. Any one
    /// of them is enough.
    fn lock_files(&self) -> &'static [&'static str];

    /// Reason reported when none of the [`lock_files`](Self::lock_files)
    /// exist.
    fn missing_lock_file_message(&self) -> String;

    /// Directory that would hold a pre-populated dependency cache.
    fn local_cache_dir(&self) -> Option<&'static str> {
        None
    }

    /// Proxy family this ecosystem fetches through, if any.
    fn proxy_family(&self) -> Option<ProxyFamily> {
        None
    }

    /// Client configuration for downstream builds.
    fn config_files(
        &self,
        _proxy: &ProxyConfig,
        _credentials: Option<&FinalCredentials>,
    ) -> Result<Vec<ConfigFile>> {
        Ok(Vec::new())
    }

    /// Environment downstream builds must set.
    fn environment_variables(
        &self,
        _proxy: &ProxyConfig,
        _credentials: Option<&FinalCredentials>,
    ) -> Result<BTreeMap<String, EnvVar>> {
        Ok(BTreeMap::new())
    }

    /// First lock file found in `source_dir`.
    fn detect(&self, source_dir: &Path) -> Option<PathBuf> {
        self.lock_files()
            .iter()
            .map(|name| source_dir.join(name))
            .find(|path| path.is_file())
    }

    /// Reject a source tree that ships its own dependency cache.
    fn check_local_cache(&self, source_dir: &Path) -> Result<()> {
        match self.local_cache_dir() {
            Some(dir) if source_dir.join(dir).exists() => Err(Error::PreexistingCacheConflict(
                format!("The {dir} directory cannot be present in the source repository"),
            )),
            _ => Ok(()),
        }
    }
}

/// Credentials are mandatory for ecosystems fetching through the proxy.
pub(crate) fn require_credentials(
    kind: PackageManagerKind,
    credentials: Option<&FinalCredentials>,
) -> Result<&FinalCredentials> {
    credentials.ok_or_else(|| {
        Error::proxy(format!(
            "No finalized proxy credentials are available for {kind}"
        ))
    })
}
