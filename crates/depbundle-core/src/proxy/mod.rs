//! Per-request caching proxy grants.
//!
//! Every request that fetches from a registry-backed ecosystem gets its own
//! repository and principal on the shared caching proxy. Isolation between
//! requests comes from naming alone: names are derived from the request id
//! and the ecosystem family, so repeating an operation targets the same
//! resources.
//!
//! Lifecycle of one `(request, family)` pair:
//!
//! ```text
//! absent ─prepare─▶ prepared ─finalize─▶ finalized ─cleanup─▶ released
//!                      └──────────────cleanup───────────────────▲
//! ```

mod ledger;
pub mod nexus;

pub use ledger::{GrantLedger, GrantState};
pub use nexus::NexusClient;

use crate::config::ProxyConfig;
use crate::error::Result;
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Length of generated principal passwords.
pub const PASSWORD_LENGTH: usize = 24;

/// Prefix of every repository and principal created on the proxy.
pub const NAME_PREFIX: &str = "depbundle";

/// Group of package managers sharing one kind of proxy repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyFamily {
    /// npm registry shaped repositories (npm, yarn).
    Js,
    /// PyPI shaped repositories (pip).
    Pip,
}

impl ProxyFamily {
    pub const ALL: [ProxyFamily; 2] = [ProxyFamily::Js, ProxyFamily::Pip];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Js => "js",
            Self::Pip => "pip",
        }
    }

    /// Parse a family tag.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == s)
    }

    /// Deterministic resource names for a request.
    #[must_use]
    pub fn names(self, request_id: u64) -> GrantNames {
        match self {
            Self::Js => GrantNames {
                repository_name: format!("{NAME_PREFIX}-js-{request_id}"),
                raw_repository_name: None,
                username: format!("{NAME_PREFIX}-js-{request_id}"),
            },
            Self::Pip => GrantNames {
                repository_name: format!("{NAME_PREFIX}-pip-hosted-{request_id}"),
                raw_repository_name: Some(format!("{NAME_PREFIX}-pip-raw-{request_id}")),
                username: format!("{NAME_PREFIX}-pip-{request_id}"),
            },
        }
    }

    fn script(self, phase: &str) -> String {
        format!("{}_{phase}", self.as_str())
    }
}

impl fmt::Display for ProxyFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Names of the proxy resources owned by one grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantNames {
    pub repository_name: String,
    /// Secondary repository for raw artifacts (pip only).
    pub raw_repository_name: Option<String>,
    pub username: String,
}

/// A prepared grant: repository plus write-scoped principal.
#[derive(Clone)]
pub struct ProxyGrant {
    pub request_id: u64,
    pub family: ProxyFamily,
    pub names: GrantNames,
    pub password: String,
}

impl fmt::Debug for ProxyGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyGrant")
            .field("request_id", &self.request_id)
            .field("family", &self.family)
            .field("names", &self.names)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Read-only credentials handed to downstream builds after finalization.
#[derive(Clone, PartialEq, Eq)]
pub struct FinalCredentials {
    pub family: ProxyFamily,
    pub repository_name: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for FinalCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalCredentials")
            .field("family", &self.family)
            .field("repository_name", &self.repository_name)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Management API of the caching proxy.
///
/// Operations are named scripts installed on the proxy that take a JSON
/// payload. Scripts must be idempotent by resource name.
#[async_trait]
pub trait ProxyClient: Send + Sync {
    async fn execute_script(&self, script: &str, payload: serde_json::Value) -> Result<()>;
}

/// Generate a random alphanumeric password.
#[must_use]
pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}

/// Prepare, finalize and release grants on the proxy.
#[derive(Clone)]
pub struct ProxyLifecycle {
    client: Arc<dyn ProxyClient>,
    config: ProxyConfig,
}

impl fmt::Debug for ProxyLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyLifecycle")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ProxyLifecycle {
    #[must_use]
    pub fn new(client: Arc<dyn ProxyClient>, config: ProxyConfig) -> Self {
        Self { client, config }
    }

    #[must_use]
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Create the request's caching repository and a principal that may
    /// write to it.
    pub async fn prepare(&self, request_id: u64, family: ProxyFamily) -> Result<ProxyGrant> {
        let names = family.names(request_id);
        let password = generate_password();

        let mut payload = json!({
            "repository_name": names.repository_name,
            "username": names.username,
            "password": password,
        });
        match family {
            ProxyFamily::Js => {
                payload["npm_proxy_url"] = json!(self.config.npm_proxy_url);
            }
            ProxyFamily::Pip => {
                payload["raw_repository_name"] = json!(names.raw_repository_name);
                payload["pypi_proxy_url"] = json!(self.config.pip_proxy_url);
            }
        }

        info!(request_id, family = %family, repository = %names.repository_name, "preparing proxy grant");
        self.client
            .execute_script(&family.script("before_content_staged"), payload)
            .await?;

        Ok(ProxyGrant {
            request_id,
            family,
            names,
            password,
        })
    }

    /// Rotate the grant's password and narrow the principal to read-only
    /// access of the now populated repository.
    pub async fn finalize(&self, grant: &ProxyGrant) -> Result<FinalCredentials> {
        let password = generate_password();

        let mut payload = json!({
            "repository_name": grant.names.repository_name,
            "username": grant.names.username,
            "password": password,
        });
        if let Some(raw) = &grant.names.raw_repository_name {
            payload["raw_repository_name"] = json!(raw);
        }

        info!(request_id = grant.request_id, family = %grant.family, "finalizing proxy grant");
        self.client
            .execute_script(&grant.family.script("after_content_staged"), payload)
            .await?;

        Ok(FinalCredentials {
            family: grant.family,
            repository_name: grant.names.repository_name.clone(),
            username: grant.names.username.clone(),
            password,
        })
    }

    /// Delete the repository and principal of `(request_id, family)`.
    ///
    /// Safe to call when nothing was ever prepared.
    pub async fn cleanup(&self, request_id: u64, family: ProxyFamily) -> Result<()> {
        let names = family.names(request_id);

        let mut payload = json!({
            "repository_name": names.repository_name,
            "username": names.username,
        });
        if let Some(raw) = &names.raw_repository_name {
            payload["raw_repository_name"] = json!(raw);
        }

        debug!(request_id, family = %family, "releasing proxy grant");
        self.client
            .execute_script(&family.script("cleanup"), payload)
            .await
    }
}
