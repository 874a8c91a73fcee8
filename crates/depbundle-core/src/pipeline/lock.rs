//! Exclusive per-request run lock.
//!
//! A pipeline holds `<bundles>/locks/<id>.lock` with `flock(LOCK_EX)` for
//! the whole run. The lock is advisory and belongs to the open file, so it
//! excludes a second run in the same process as well as in any other process
//! sharing the bundles directory. The OS drops it when the holder exits.

use crate::error::{Error, Result};
use crate::paths::RequestBundleDir;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use tracing::{debug, trace};

/// Held while a request runs. Released on drop.
#[derive(Debug)]
pub struct RequestLock {
    /// Kept open to hold the lock
    _file: File,
    request_id: u64,
}

impl RequestLock {
    /// Take the lock of the request without blocking.
    ///
    /// # Errors
    /// `RequestBusy` if another run holds it, `Io` if the lock file cannot
    /// be opened.
    pub fn try_acquire(bundle: &RequestBundleDir) -> Result<Self> {
        let path = bundle.lock_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                trace!(request_id = bundle.request_id(), path = %path.display(), "acquired request lock");
                Ok(Self {
                    _file: file,
                    request_id: bundle.request_id(),
                })
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                debug!(request_id = bundle.request_id(), "request lock is held by another run");
                Err(Error::RequestBusy(bundle.request_id()))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[must_use]
    pub fn request_id(&self) -> u64 {
        self.request_id
    }
}
