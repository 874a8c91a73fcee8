use super::{require_credentials, PackageManager, PackageManagerKind};
use crate::config::ProxyConfig;
use crate::error::{Error, Result};
use crate::packages::PackageType;
use crate::proxy::{FinalCredentials, ProxyFamily};
use crate::request::EnvVar;
use std::collections::BTreeMap;
use url::Url;

/// pip projects described by `setup.py` or `setup.cfg`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pip;

impl PackageManager for Pip {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Pip
    }

    fn package_type(&self) -> PackageType {
        PackageType::Pip
    }

    fn lock_files(&self) -> &'static [&'static str] {
        &["setup.py", "setup.cfg"]
    }

    fn missing_lock_file_message(&self) -> String {
        "The setup.py or setup.cfg file must be present for the pip package manager".to_string()
    }

    fn proxy_family(&self) -> Option<ProxyFamily> {
        Some(ProxyFamily::Pip)
    }

    fn environment_variables(
        &self,
        proxy: &ProxyConfig,
        credentials: Option<&FinalCredentials>,
    ) -> Result<BTreeMap<String, EnvVar>> {
        let credentials = require_credentials(self.kind(), credentials)?;
        let index = index_url(proxy, credentials)?;
        Ok(BTreeMap::from([(
            "PIP_INDEX_URL".to_string(),
            EnvVar::literal(index),
        )]))
    }
}

/// Simple index URL of the request's hosted repository, with credentials.
fn index_url(proxy: &ProxyConfig, credentials: &FinalCredentials) -> Result<String> {
    let raw = format!("{}simple", proxy.repository_url(&credentials.repository_name));
    let mut url =
        Url::parse(&raw).map_err(|e| Error::proxy(format!("Invalid index URL '{raw}': {e}")))?;
    url.set_username(&credentials.username)
        .and_then(|()| url.set_password(Some(&credentials.password)))
        .map_err(|()| Error::proxy(format!("Cannot embed credentials in '{raw}'")))?;
    Ok(url.to_string())
}
