use crate::error::{Error, Result};
use crate::paths::default_bundles_dir;
use crate::pkg_managers::PackageManagerKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the proxy admin password.
pub const PROXY_PASSWORD_ENV: &str = "DEPBUNDLE_PROXY_PASSWORD";

/// Default number of pipeline workers.
pub const DEFAULT_WORKERS: usize = 4;

/// Default per-stage timeout for resolver invocations (one hour).
pub const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 60 * 60;

/// Engine configuration, loaded from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Root of all request working directories and output archives.
    pub bundles_dir: PathBuf,

    /// Number of concurrent pipeline workers.
    pub workers: usize,

    /// Upper bound on a single resolver invocation, in seconds.
    pub stage_timeout_secs: u64,

    /// Explicit path to the `git` binary. Looked up on `PATH` when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<PathBuf>,

    /// Caching proxy management settings.
    pub proxy: ProxyConfig,

    /// External resolver command per package manager.
    pub resolvers: BTreeMap<PackageManagerKind, ResolverCommand>,
}

/// Settings for the caching proxy (a Nexus instance with the depbundle
/// scripts installed).
#[derive(Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    /// Base URL of the proxy, e.g. `http://nexus:8081`.
    pub url: String,
    /// Admin principal used to run management scripts.
    pub username: String,
    pub password: String,
    /// Upstream npm registry proxied by per-request js repositories.
    pub npm_proxy_url: String,
    /// Upstream PyPI index proxied by per-request pip repositories.
    pub pip_proxy_url: String,
    /// Request timeout for management calls, in seconds.
    pub timeout_secs: u64,
}

/// An external program implementing the resolver protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolverCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bundles_dir: default_bundles_dir(),
            workers: DEFAULT_WORKERS,
            stage_timeout_secs: DEFAULT_STAGE_TIMEOUT_SECS,
            git: None,
            proxy: ProxyConfig::default(),
            resolvers: BTreeMap::new(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8081".to_string(),
            username: "depbundle".to_string(),
            password: String::new(),
            npm_proxy_url: "https://registry.npmjs.org/".to_string(),
            pip_proxy_url: "https://pypi.org/".to_string(),
            timeout_secs: 30,
        }
    }
}

// The admin password must never reach logs
impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("npm_proxy_url", &self.npm_proxy_url)
            .field("pip_proxy_url", &self.pip_proxy_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl ProxyConfig {
    /// URL of a repository hosted on the proxy, with a trailing slash.
    #[must_use]
    pub fn repository_url(&self, repository_name: &str) -> String {
        format!(
            "{}/repository/{repository_name}/",
            self.url.trim_end_matches('/')
        )
    }
}

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// With no path, defaults are used. Environment overrides are applied
    /// in both cases.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env(&mut self) {
        if let Ok(password) = std::env::var(PROXY_PASSWORD_ENV) {
            self.proxy.password = password;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::validation("The number of workers must be at least 1"));
        }
        if self.stage_timeout_secs == 0 {
            return Err(Error::validation("The stage timeout must be at least 1 second"));
        }
        url::Url::parse(&self.proxy.url)
            .map_err(|e| Error::validation(format!("Invalid proxy URL '{}': {e}", self.proxy.url)))?;
        Ok(())
    }

    /// Directory of the persisted request records.
    #[must_use]
    pub fn requests_dir(&self) -> PathBuf {
        self.bundles_dir.join("requests")
    }

    #[must_use]
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    /// Set the bundles directory.
    #[must_use]
    pub fn with_bundles_dir(mut self, dir: PathBuf) -> Self {
        self.bundles_dir = dir;
        self
    }

    /// Set the worker count.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the per-stage timeout.
    #[must_use]
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Register a resolver command for a package manager.
    #[must_use]
    pub fn with_resolver(mut self, kind: PackageManagerKind, command: ResolverCommand) -> Self {
        self.resolvers.insert(kind, command);
        self
    }
}
