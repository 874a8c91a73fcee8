//! Ecosystem resolvers.
//!
//! depbundle never computes a dependency graph itself. A resolver is handed
//! the fetched source tree, the directory its dependency cache must be
//! populated into and, for proxied ecosystems, the request's proxy access.
//! It answers with one package and its dependencies.
//!
//! [`CommandResolver`] runs an external program. The program receives its
//! inputs as environment variables and prints the resolution on stdout:
//!
//! ```json
//! {
//!   "package": {"name": "my-app", "type": "npm", "version": "1.0.0"},
//!   "path": ".",
//!   "dependencies": [{"name": "async", "type": "npm", "version": "3.2.0"}]
//! }
//! ```

use crate::config::{Config, ResolverCommand};
use crate::error::{Error, Result};
use crate::packages::{Dependency, PackageInfo};
use crate::pkg_managers::PackageManagerKind;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, warn};

pub const REQUEST_ID_ENV: &str = "DEPBUNDLE_REQUEST_ID";
pub const PACKAGE_MANAGER_ENV: &str = "DEPBUNDLE_PACKAGE_MANAGER";
pub const SOURCE_DIR_ENV: &str = "DEPBUNDLE_SOURCE_DIR";
pub const OUTPUT_DIR_ENV: &str = "DEPBUNDLE_OUTPUT_DIR";
pub const PROXY_URL_ENV: &str = "DEPBUNDLE_PROXY_URL";
pub const PROXY_USERNAME_ENV: &str = "DEPBUNDLE_PROXY_USERNAME";
pub const PROXY_PASSWORD_ENV: &str = "DEPBUNDLE_PROXY_PASSWORD";

/// Number of stderr lines kept in a resolution error.
const STDERR_TAIL_LINES: usize = 20;

/// Proxy repository a resolver must fetch through.
#[derive(Clone)]
pub struct ProxyAccess {
    pub repository_url: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ProxyAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyAccess")
            .field("repository_url", &self.repository_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Inputs of one resolver invocation.
#[derive(Debug, Clone)]
pub struct ResolveContext {
    pub request_id: u64,
    pub kind: PackageManagerKind,
    pub source_dir: PathBuf,
    /// Where the ecosystem's dependency cache must end up.
    pub output_dir: PathBuf,
    pub proxy: Option<ProxyAccess>,
}

/// What a resolver found.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Resolution {
    pub package: PackageInfo,
    /// Package location relative to the source root.
    #[serde(default = "root_path")]
    pub path: String,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

fn root_path() -> String {
    ".".to_string()
}

#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, ctx: &ResolveContext) -> Result<Resolution>;
}

/// Resolver backed by an external program.
#[derive(Debug, Clone)]
pub struct CommandResolver {
    command: ResolverCommand,
}

impl CommandResolver {
    #[must_use]
    pub fn new(command: ResolverCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl Resolver for CommandResolver {
    async fn resolve(&self, ctx: &ResolveContext) -> Result<Resolution> {
        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .current_dir(&ctx.source_dir)
            .env(REQUEST_ID_ENV, ctx.request_id.to_string())
            .env(PACKAGE_MANAGER_ENV, ctx.kind.as_str())
            .env(SOURCE_DIR_ENV, &ctx.source_dir)
            .env(OUTPUT_DIR_ENV, &ctx.output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A stage timeout drops the future; the child must not outlive it
            .kill_on_drop(true);
        if let Some(proxy) = &ctx.proxy {
            cmd.env(PROXY_URL_ENV, &proxy.repository_url)
                .env(PROXY_USERNAME_ENV, &proxy.username)
                .env(PROXY_PASSWORD_ENV, &proxy.password);
        }

        debug!(
            request_id = ctx.request_id,
            pm = %ctx.kind,
            program = %self.command.program,
            "running resolver"
        );
        let output = cmd.output().await.map_err(|e| {
            Error::resolution(format!(
                "Failed to run the {} resolver '{}': {e}",
                ctx.kind, self.command.program
            ))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(request_id = ctx.request_id, pm = %ctx.kind, status = %output.status, "resolver failed");
            return Err(Error::resolution(format!(
                "Failed to fetch the {} dependencies: {}",
                ctx.kind,
                stderr_tail(&stderr)
            )));
        }

        parse_resolution(ctx.kind, &output.stdout)
    }
}

/// Decode a resolver's stdout.
pub fn parse_resolution(kind: PackageManagerKind, stdout: &[u8]) -> Result<Resolution> {
    serde_json::from_slice(stdout).map_err(|e| {
        Error::resolution(format!(
            "The {kind} resolver returned invalid output: {e}"
        ))
    })
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.trim().lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    let tail = lines[start..].join("\n");
    if tail.is_empty() {
        "the resolver exited unsuccessfully".to_string()
    } else {
        tail
    }
}

/// Resolver per package manager.
#[derive(Clone, Default)]
pub struct Resolvers {
    resolvers: HashMap<PackageManagerKind, Arc<dyn Resolver>>,
}

impl fmt::Debug for Resolvers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.resolvers.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        f.debug_struct("Resolvers").field("kinds", &kinds).finish()
    }
}

impl Resolvers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Command resolvers for every package manager the config names.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let mut resolvers = Self::new();
        for (kind, command) in &config.resolvers {
            resolvers.insert(*kind, Arc::new(CommandResolver::new(command.clone())));
        }
        resolvers
    }

    pub fn insert(&mut self, kind: PackageManagerKind, resolver: Arc<dyn Resolver>) {
        self.resolvers.insert(kind, resolver);
    }

    #[must_use]
    pub fn with(mut self, kind: PackageManagerKind, resolver: Arc<dyn Resolver>) -> Self {
        self.insert(kind, resolver);
        self
    }

    pub fn get(&self, kind: PackageManagerKind) -> Result<Arc<dyn Resolver>> {
        self.resolvers.get(&kind).cloned().ok_or_else(|| {
            Error::resolution(format!(
                "No resolver is configured for the {kind} package manager"
            ))
        })
    }
}
