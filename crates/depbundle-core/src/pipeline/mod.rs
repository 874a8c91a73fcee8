//! Request pipelines.
//!
//! A pipeline run takes one request from `initiated` to a terminal state by
//! executing its stage chain strictly in order. The first failing stage
//! stops the chain and fails the request with the error's message. Every
//! proxy grant prepared during the run is released before the terminal
//! state is recorded, whichever way the run ended.

mod chain;
mod lock;

pub use chain::{build_chain, Stage};
pub use lock::RequestLock;

use crate::archive::{assemble_archive, write_metadata};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::packages::PackagesData;
use crate::paths::RequestBundleDir;
use crate::pkg_managers::PackageManagerKind;
use crate::proxy::{
    GrantLedger, GrantState, NexusClient, ProxyClient, ProxyFamily, ProxyLifecycle,
};
use crate::request::{Request, RequestState, COMPLETED_REASON};
use crate::resolver::{ProxyAccess, ResolveContext, Resolvers};
use crate::source::{GitFetcher, SourceFetcher};
use crate::store::RequestStore;
use depbundle_util::fs::remove_dir_if_exists;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Drives request stage chains against the engine's collaborators.
pub struct Pipeline {
    store: Arc<dyn RequestStore>,
    fetcher: Arc<dyn SourceFetcher>,
    resolvers: Resolvers,
    proxy: ProxyLifecycle,
    bundles_dir: PathBuf,
    stage_timeout: Duration,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("resolvers", &self.resolvers)
            .field("proxy", &self.proxy)
            .field("bundles_dir", &self.bundles_dir)
            .field("stage_timeout", &self.stage_timeout)
            .finish_non_exhaustive()
    }
}

/// State threaded through the stages of one run.
struct RunState {
    bundle: RequestBundleDir,
    ledger: GrantLedger,
    packages: PackagesData,
    /// Package managers whose dependencies were actually fetched.
    fetched: Vec<PackageManagerKind>,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        config: &Config,
        store: Arc<dyn RequestStore>,
        fetcher: Arc<dyn SourceFetcher>,
        resolvers: Resolvers,
        proxy_client: Arc<dyn ProxyClient>,
    ) -> Self {
        Self {
            store,
            fetcher,
            resolvers,
            proxy: ProxyLifecycle::new(proxy_client, config.proxy.clone()),
            bundles_dir: config.bundles_dir.clone(),
            stage_timeout: config.stage_timeout(),
        }
    }

    /// Wire the production collaborators: `git`, the configured resolver
    /// commands and the Nexus script API.
    pub fn from_config(config: &Config, store: Arc<dyn RequestStore>) -> Result<Self> {
        let fetcher = GitFetcher::new(config.git.as_deref())?;
        let client = NexusClient::new(&config.proxy)?;
        Ok(Self::new(
            config,
            store,
            Arc::new(fetcher),
            Resolvers::from_config(config),
            Arc::new(client),
        ))
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn RequestStore> {
        &self.store
    }

    /// Working directories and outputs of `request_id`.
    #[must_use]
    pub fn bundle_dir(&self, request_id: u64) -> RequestBundleDir {
        RequestBundleDir::new(&self.bundles_dir, request_id)
    }

    /// Claim `request_id` for one run, across every pipeline sharing the
    /// bundles directory.
    pub fn claim(&self, request_id: u64) -> Result<RequestLock> {
        RequestLock::try_acquire(&self.bundle_dir(request_id))
    }

    /// Run the whole chain of `request_id` and return the terminal request.
    ///
    /// Fails without side effects when the request is unknown, already
    /// terminal or already running. Stage failures are not errors of this
    /// call: they are recorded on the returned request.
    pub async fn run(&self, request_id: u64) -> Result<Request> {
        let _active = self.claim(request_id)?;
        let request = self.store.get(request_id).await?;
        request.ensure_mutable()?;

        let chain = build_chain(&request);
        info!(request_id, stages = chain.len(), "starting pipeline");

        let mut state = RunState {
            bundle: self.bundle_dir(request_id),
            ledger: GrantLedger::new(request_id),
            packages: PackagesData::new(),
            fetched: Vec::new(),
        };

        let outcome = self.execute(&request, &chain, &mut state).await;
        self.release_grants(request_id, &mut state.ledger).await;

        match outcome {
            Ok(()) => {
                if let Err(e) = remove_dir_if_exists(state.bundle.root()) {
                    warn!(request_id, error = %e, "failed to remove the working directory");
                }
                info!(request_id, "request completed");
                self.store
                    .update_state(request_id, RequestState::Complete, COMPLETED_REASON)
                    .await
            }
            Err(e) => {
                error!(request_id, code = e.code(), error = %e, "request failed");
                self.store
                    .update_state(request_id, RequestState::Failed, &e.to_string())
                    .await
            }
        }
    }

    /// Force-release the proxy grant of `(request_id, family)`.
    ///
    /// Safe to call for grants that were never prepared or were already
    /// released.
    pub async fn cleanup_ecosystem(&self, request_id: u64, family: ProxyFamily) -> Result<()> {
        info!(request_id, family = %family, "cleaning up proxy resources");
        self.proxy.cleanup(request_id, family).await
    }

    async fn execute(&self, request: &Request, chain: &[Stage], state: &mut RunState) -> Result<()> {
        for stage in chain {
            debug!(request_id = request.id, stage = %stage, "running stage");
            match *stage {
                Stage::FetchSource => self.fetch_source(request, state).await?,
                Stage::FetchDeps { kind, auto_detect } => {
                    self.fetch_deps(request.id, kind, auto_detect, state).await?;
                }
                Stage::AssembleArchive => self.assemble(request.id, state).await?,
            }
        }
        Ok(())
    }

    async fn set_reason(&self, request_id: u64, reason: &str) -> Result<()> {
        self.store
            .update_state(request_id, RequestState::InProgress, reason)
            .await
            .map(|_| ())
    }

    async fn fetch_source(&self, request: &Request, state: &mut RunState) -> Result<()> {
        self.set_reason(request.id, "Fetching the application source")
            .await?;
        remove_dir_if_exists(state.bundle.root())?;

        let dest = state.bundle.source_dir();
        tokio::time::timeout(
            self.stage_timeout,
            self.fetcher.fetch(&request.repo, &request.git_ref, &dest),
        )
        .await
        .map_err(|_| {
            Error::ContentFetch(format!(
                "Fetching the application source timed out after {}s",
                self.stage_timeout.as_secs()
            ))
        })?
    }

    async fn fetch_deps(
        &self,
        request_id: u64,
        kind: PackageManagerKind,
        auto_detect: bool,
        state: &mut RunState,
    ) -> Result<()> {
        let pm = kind.manager();
        let source_dir = state.bundle.source_dir();

        debug!(request_id, pm = %kind, "checking if the application source uses the package manager");
        if pm.detect(&source_dir).is_none() {
            if auto_detect {
                info!(request_id, pm = %kind, "the application source does not use this package manager");
                return Ok(());
            }
            return Err(Error::PrerequisiteMissing(pm.missing_lock_file_message()));
        }
        pm.check_local_cache(&source_dir)?;

        let grant = match pm.proxy_family() {
            Some(family) => {
                self.set_reason(request_id, &format!("Configuring the proxy for {kind}"))
                    .await?;
                // Recorded before the attempt so a partial prepare is released too
                state.ledger.advance(family, GrantState::Prepared)?;
                Some(self.proxy.prepare(request_id, family).await?)
            }
            None => None,
        };

        self.set_reason(request_id, &format!("Fetching the {kind} dependencies"))
            .await?;
        let output_dir = state.bundle.deps_dir(kind);
        tokio::fs::create_dir_all(&output_dir).await?;

        let ctx = ResolveContext {
            request_id,
            kind,
            source_dir,
            output_dir,
            proxy: grant.as_ref().map(|grant| ProxyAccess {
                repository_url: self
                    .proxy
                    .config()
                    .repository_url(&grant.names.repository_name),
                username: grant.names.username.clone(),
                password: grant.password.clone(),
            }),
        };
        let resolver = self.resolvers.get(kind)?;
        let resolution = tokio::time::timeout(self.stage_timeout, resolver.resolve(&ctx))
            .await
            .map_err(|_| {
                Error::resolution(format!(
                    "Fetching the {kind} dependencies timed out after {}s",
                    self.stage_timeout.as_secs()
                ))
            })??;

        if resolution.package.kind != pm.package_type() {
            return Err(Error::resolution(format!(
                "The {kind} resolver returned a package of type {}",
                resolution.package.kind
            )));
        }

        let credentials = match grant {
            Some(grant) => {
                self.set_reason(
                    request_id,
                    &format!("Finalizing the proxy configuration for {kind}"),
                )
                .await?;
                let credentials = self.proxy.finalize(&grant).await?;
                state.ledger.advance(grant.family, GrantState::Finalized)?;
                Some(credentials)
            }
            None => None,
        };

        let config_files = pm.config_files(self.proxy.config(), credentials.as_ref())?;
        let environment = pm.environment_variables(self.proxy.config(), credentials.as_ref())?;

        state.packages.add_package(
            resolution.package.clone(),
            &resolution.path,
            resolution.dependencies.clone(),
        )?;
        state.packages.write_to_file(&state.bundle.packages_data())?;

        if !config_files.is_empty() {
            self.store.add_config_files(request_id, config_files).await?;
        }
        if !environment.is_empty() {
            self.store
                .add_environment_variables(request_id, environment)
                .await?;
        }
        self.store
            .add_packages(request_id, vec![resolution.package])
            .await?;
        self.store
            .add_dependencies(request_id, resolution.dependencies)
            .await?;

        state.fetched.push(kind);
        info!(request_id, pm = %kind, "dependencies fetched");
        Ok(())
    }

    async fn assemble(&self, request_id: u64, state: &mut RunState) -> Result<()> {
        self.set_reason(request_id, "Assembling the bundle archive")
            .await?;

        let bundle = state.bundle.clone();
        let kinds = state.fetched.clone();
        let packages = state.packages.clone();
        let archive = tokio::task::spawn_blocking(move || {
            let archive = assemble_archive(&bundle, &kinds, &bundle.archive_path())?;
            write_metadata(&bundle, &packages)?;
            Ok::<_, Error>(archive)
        })
        .await
        .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e)))??;

        self.store.set_archive(request_id, archive).await
    }

    /// Release every grant the ledger still holds. Failures are logged and
    /// never change the request's outcome.
    async fn release_grants(&self, request_id: u64, ledger: &mut GrantLedger) {
        for family in ledger.held() {
            match self.proxy.cleanup(request_id, family).await {
                Ok(()) => {
                    if let Err(e) = ledger.advance(family, GrantState::Released) {
                        warn!(request_id, family = %family, error = %e, "unexpected grant state");
                    }
                }
                Err(e) => {
                    warn!(request_id, family = %family, error = %e, "failed to release proxy grant");
                }
            }
        }
    }
}
