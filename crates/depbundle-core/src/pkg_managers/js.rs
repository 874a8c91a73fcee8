use super::npmrc::{generate_npmrc_content, NPMRC_PATH};
use super::{require_credentials, PackageManager, PackageManagerKind};
use crate::config::ProxyConfig;
use crate::error::Result;
use crate::packages::PackageType;
use crate::proxy::{FinalCredentials, ProxyFamily};
use crate::request::ConfigFile;

/// npm, locked by `npm-shrinkwrap.json` or `package-lock.json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Npm;

/// yarn v1, locked by `yarn.lock`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Yarn;

fn npmrc_file(
    kind: PackageManagerKind,
    proxy: &ProxyConfig,
    credentials: Option<&FinalCredentials>,
) -> Result<Vec<ConfigFile>> {
    let credentials = require_credentials(kind, credentials)?;
    let registry = proxy.repository_url(&credentials.repository_name);
    let content = generate_npmrc_content(&registry, &credentials.username, &credentials.password)?;
    Ok(vec![ConfigFile::base64(NPMRC_PATH, content.as_bytes())])
}

impl PackageManager for Npm {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Npm
    }

    fn package_type(&self) -> PackageType {
        PackageType::Npm
    }

    fn lock_files(&self) -> &'static [&'static str] {
        &["npm-shrinkwrap.json", "package-lock.json"]
    }

    fn missing_lock_file_message(&self) -> String {
        "The npm-shrinkwrap.json or package-lock.json file must be present for the npm \
         package manager"
            .to_string()
    }

    fn local_cache_dir(&self) -> Option<&'static str> {
        Some("node_modules")
    }

    fn proxy_family(&self) -> Option<ProxyFamily> {
        Some(ProxyFamily::Js)
    }

    fn config_files(
        &self,
        proxy: &ProxyConfig,
        credentials: Option<&FinalCredentials>,
    ) -> Result<Vec<ConfigFile>> {
        npmrc_file(self.kind(), proxy, credentials)
    }
}

impl PackageManager for Yarn {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Yarn
    }

    fn package_type(&self) -> PackageType {
        PackageType::Yarn
    }

    fn lock_files(&self) -> &'static [&'static str] {
        &["yarn.lock"]
    }

    fn missing_lock_file_message(&self) -> String {
        "The yarn.lock file must be present for the yarn package manager".to_string()
    }

    fn local_cache_dir(&self) -> Option<&'static str> {
        Some("node_modules")
    }

    fn proxy_family(&self) -> Option<ProxyFamily> {
        Some(ProxyFamily::Js)
    }

    fn config_files(
        &self,
        proxy: &ProxyConfig,
        credentials: Option<&FinalCredentials>,
    ) -> Result<Vec<ConfigFile>> {
        npmrc_file(self.kind(), proxy, credentials)
    }
}
