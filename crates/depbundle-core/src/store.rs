//! Durable request records.
//!
//! The pipeline only talks to [`RequestStore`]; [`FileStore`] keeps one JSON
//! document per request in a directory:
//!
//! ```text
//! <requests>/1.json
//! <requests>/2.json
//! ```

use crate::error::{Error, Result};
use crate::packages::{Dependency, PackageInfo};
use crate::request::{
    ArchiveInfo, ConfigFile, EnvVar, Request, RequestState, RequestSubmission,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Lookup and update of request records.
///
/// Implementations serialize concurrent updates of the same record. Every
/// mutating call fails with `InvalidTransition` once the request is
/// terminal.
#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn create(&self, submission: RequestSubmission) -> Result<Request>;

    async fn get(&self, id: u64) -> Result<Request>;

    /// All requests, ordered by id.
    async fn list(&self) -> Result<Vec<Request>>;

    async fn update_state(&self, id: u64, state: RequestState, reason: &str) -> Result<Request>;

    /// Attach config files, replacing any existing file with the same path.
    async fn add_config_files(&self, id: u64, files: Vec<ConfigFile>) -> Result<()>;

    async fn add_environment_variables(
        &self,
        id: u64,
        variables: BTreeMap<String, EnvVar>,
    ) -> Result<()>;

    async fn add_packages(&self, id: u64, packages: Vec<PackageInfo>) -> Result<()>;

    /// Attach dependencies, skipping exact duplicates of attached ones.
    async fn add_dependencies(&self, id: u64, dependencies: Vec<Dependency>) -> Result<()>;

    async fn set_archive(&self, id: u64, archive: ArchiveInfo) -> Result<()>;
}

/// A directory of JSON request documents.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    // Guards every read-modify-write and id allocation
    lock: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn read(&self, id: u64) -> Result<Request> {
        let path = self.record_path(id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::RequestNotFound(id))
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content).map_err(|e| {
            Error::store(format!("Corrupted request record {}: {e}", path.display()))
        })
    }

    fn write(&self, request: &Request) -> Result<()> {
        let mut content = serde_json::to_string_pretty(request)
            .map_err(|e| Error::store(format!("Failed to serialize request {}: {e}", request.id)))?;
        content.push('\n');
        depbundle_util::fs::atomic_write(&self.record_path(request.id), content.as_bytes())?;
        Ok(())
    }

    fn ids(&self) -> Result<Vec<u64>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if let Ok(id) = stem.parse::<u64>() {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Apply `f` to a mutable request under the store lock and persist it.
    async fn modify<F>(&self, id: u64, f: F) -> Result<Request>
    where
        F: FnOnce(&mut Request) -> Result<()> + Send,
    {
        let _guard = self.lock.lock().await;
        let mut request = self.read(id)?;
        f(&mut request)?;
        request.touch();
        self.write(&request)?;
        Ok(request)
    }

    async fn modify_mutable<F>(&self, id: u64, f: F) -> Result<()>
    where
        F: FnOnce(&mut Request) + Send,
    {
        self.modify(id, |request| {
            request.ensure_mutable()?;
            f(request);
            Ok(())
        })
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl RequestStore for FileStore {
    async fn create(&self, submission: RequestSubmission) -> Result<Request> {
        let _guard = self.lock.lock().await;
        let id = self.ids()?.last().map_or(1, |last| last + 1);
        let request = Request::new(id, submission);
        self.write(&request)?;
        debug!(request_id = id, repo = %request.repo, "request created");
        Ok(request)
    }

    async fn get(&self, id: u64) -> Result<Request> {
        let _guard = self.lock.lock().await;
        self.read(id)
    }

    async fn list(&self) -> Result<Vec<Request>> {
        let _guard = self.lock.lock().await;
        self.ids()?.into_iter().map(|id| self.read(id)).collect()
    }

    async fn update_state(&self, id: u64, state: RequestState, reason: &str) -> Result<Request> {
        trace!(request_id = id, state = %state, reason, "updating request state");
        self.modify(id, |request| request.transition(state, reason))
            .await
    }

    async fn add_config_files(&self, id: u64, files: Vec<ConfigFile>) -> Result<()> {
        self.modify_mutable(id, move |request| {
            for file in files {
                request.config_files.retain(|existing| existing.path != file.path);
                request.config_files.push(file);
            }
        })
        .await
    }

    async fn add_environment_variables(
        &self,
        id: u64,
        variables: BTreeMap<String, EnvVar>,
    ) -> Result<()> {
        self.modify_mutable(id, move |request| {
            request.environment_variables.extend(variables);
        })
        .await
    }

    async fn add_packages(&self, id: u64, packages: Vec<PackageInfo>) -> Result<()> {
        self.modify_mutable(id, move |request| {
            for package in packages {
                if !request.packages.contains(&package) {
                    request.packages.push(package);
                }
            }
        })
        .await
    }

    async fn add_dependencies(&self, id: u64, dependencies: Vec<Dependency>) -> Result<()> {
        self.modify_mutable(id, move |request| {
            for dep in dependencies {
                if !request.dependencies.contains(&dep) {
                    request.dependencies.push(dep);
                }
            }
        })
        .await
    }

    async fn set_archive(&self, id: u64, archive: ArchiveInfo) -> Result<()> {
        self.modify_mutable(id, move |request| {
            request.archive = Some(archive);
        })
        .await
    }
}
