use super::{PackageManager, PackageManagerKind};
use crate::config::ProxyConfig;
use crate::error::Result;
use crate::packages::PackageType;
use crate::proxy::FinalCredentials;
use crate::request::EnvVar;
use std::collections::BTreeMap;

/// Go modules. Fetches straight into the module cache, no proxy grant.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gomod;

impl PackageManager for Gomod {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Gomod
    }

    fn package_type(&self) -> PackageType {
        PackageType::Gomod
    }

    fn lock_files(&self) -> &'static [&'static str] {
        &["go.mod"]
    }

    fn missing_lock_file_message(&self) -> String {
        "The go.mod file must be present for the gomod package manager".to_string()
    }

    fn local_cache_dir(&self) -> Option<&'static str> {
        Some("vendor")
    }

    // Paths are relative to the extracted archive, whose gomod/ directory
    // is a GOPATH holding the module cache.
    fn environment_variables(
        &self,
        _proxy: &ProxyConfig,
        _credentials: Option<&FinalCredentials>,
    ) -> Result<BTreeMap<String, EnvVar>> {
        Ok(BTreeMap::from([
            ("GOCACHE".to_string(), EnvVar::path("gomod")),
            ("GOFLAGS".to_string(), EnvVar::literal("-mod=mod")),
            ("GOMODCACHE".to_string(), EnvVar::path("gomod/pkg/mod")),
            ("GOPATH".to_string(), EnvVar::path("gomod")),
        ]))
    }
}
