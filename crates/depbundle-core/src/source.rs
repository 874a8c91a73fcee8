//! Application source materialization.

use crate::error::{Error, Result};
use async_trait::async_trait;
use depbundle_util::fs::remove_dir_if_exists;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Materializes `repo` at an exact revision into a directory.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Populate `dest` with the source tree at `git_ref`. Anything already in
    /// `dest` is replaced.
    async fn fetch(&self, repo: &str, git_ref: &str, dest: &Path) -> Result<()>;
}

/// Fetches with the `git` binary. The checkout's `.git` directory is
/// removed so only tracked content ends up in the bundle.
#[derive(Debug, Clone)]
pub struct GitFetcher {
    git: PathBuf,
}

impl GitFetcher {
    /// Use `git` when given, otherwise look it up on `PATH`.
    pub fn new(git: Option<&Path>) -> Result<Self> {
        let git = match git {
            Some(path) => path.to_path_buf(),
            None => which::which("git").map_err(|e| {
                Error::ContentFetch(format!("The git executable could not be found: {e}"))
            })?,
        };
        Ok(Self { git })
    }

    #[must_use]
    pub fn git(&self) -> &Path {
        &self.git
    }

    async fn run(&self, args: &[&str], cwd: Option<&Path>) -> std::result::Result<(), String> {
        let mut cmd = Command::new(&self.git);
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }

        let output = cmd.output().await.map_err(|e| e.to_string())?;
        if output.status.success() {
            Ok(())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
        }
    }
}

#[async_trait]
impl SourceFetcher for GitFetcher {
    async fn fetch(&self, repo: &str, git_ref: &str, dest: &Path) -> Result<()> {
        remove_dir_if_exists(dest)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let dest_str = dest.to_string_lossy();
        info!(repo, git_ref, "cloning the application source");
        self.run(&["clone", "--quiet", "--no-checkout", repo, &*dest_str], None)
            .await
            .map_err(|stderr| {
                debug!(repo, %stderr, "git clone failed");
                Error::ContentFetch("Cloning the Git repository failed".to_string())
            })?;

        self.run(
            &["-c", "advice.detachedHead=false", "checkout", "--quiet", git_ref],
            Some(dest),
        )
        .await
        .map_err(|stderr| {
            debug!(repo, git_ref, %stderr, "git checkout failed");
            Error::ContentFetch(format!(
                "The Git repository does not contain the commit {git_ref}"
            ))
        })?;

        remove_dir_if_exists(&dest.join(".git"))?;
        Ok(())
    }
}
