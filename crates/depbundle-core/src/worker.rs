//! Worker pool running request pipelines.
//!
//! Workers pull request ids from one shared queue. Distinct requests run in
//! parallel; a request that is queued or running cannot be queued again, so
//! at most one pipeline per request is ever in flight.

use crate::error::{Error, Result};
use crate::pipeline::Pipeline;
use crate::request::Request;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result of one pipeline run, as seen by the pool.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub request_id: u64,
    pub result: Result<Request>,
}

type Queue = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<u64>>>;

pub struct WorkerPool {
    sender: mpsc::UnboundedSender<u64>,
    in_flight: Arc<Mutex<HashSet<u64>>>,
    outcomes: Arc<Mutex<Vec<PipelineOutcome>>>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Spawn `workers` workers (at least one) on the current runtime.
    #[must_use]
    pub fn start(pipeline: Arc<Pipeline>, workers: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let queue: Queue = Arc::new(tokio::sync::Mutex::new(receiver));
        let in_flight = Arc::new(Mutex::new(HashSet::new()));
        let outcomes = Arc::new(Mutex::new(Vec::new()));

        let workers = (0..workers.max(1))
            .map(|worker| {
                let pipeline = Arc::clone(&pipeline);
                let queue = Arc::clone(&queue);
                let in_flight = Arc::clone(&in_flight);
                let outcomes = Arc::clone(&outcomes);
                tokio::spawn(async move {
                    run_worker(worker, pipeline, queue, in_flight, outcomes).await;
                })
            })
            .collect();

        Self {
            sender,
            in_flight,
            outcomes,
            workers,
        }
    }

    /// Queue a request.
    ///
    /// # Errors
    /// `RequestBusy` if the request is already queued or running.
    pub fn submit(&self, request_id: u64) -> Result<()> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(request_id) {
            return Err(Error::RequestBusy(request_id));
        }
        if self.sender.send(request_id).is_err() {
            in_flight.remove(&request_id);
            return Err(Error::store("The worker pool has shut down"));
        }
        debug!(request_id, "request queued");
        Ok(())
    }

    /// Number of requests queued or running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Stop accepting work, wait for everything queued to finish and return
    /// the outcomes in completion order.
    pub async fn shutdown(self) -> Vec<PipelineOutcome> {
        drop(self.sender);
        for joined in join_all(self.workers).await {
            if let Err(e) = joined {
                warn!(error = %e, "worker panicked");
            }
        }
        std::mem::take(&mut *self.outcomes.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

async fn run_worker(
    worker: usize,
    pipeline: Arc<Pipeline>,
    queue: Queue,
    in_flight: Arc<Mutex<HashSet<u64>>>,
    outcomes: Arc<Mutex<Vec<PipelineOutcome>>>,
) {
    loop {
        // Hold the queue lock only while waiting for the next id
        let next = queue.lock().await.recv().await;
        let Some(request_id) = next else {
            debug!(worker, "queue closed, worker exiting");
            return;
        };

        info!(worker, request_id, "processing request");
        let result = pipeline.run(request_id).await;
        if let Err(e) = &result {
            warn!(worker, request_id, error = %e, "pipeline did not run");
        }

        in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&request_id);
        outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PipelineOutcome { request_id, result });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::proxy::testing::RecordingClient;
    use crate::request::{RequestState, RequestSubmission};
    use crate::resolver::Resolvers;
    use crate::source::SourceFetcher;
    use crate::store::{FileStore, RequestStore};
    use async_trait::async_trait;
    use std::path::Path;
    use tempfile::tempdir;

    struct SlowFetcher;

    #[async_trait]
    impl SourceFetcher for SlowFetcher {
        async fn fetch(&self, _repo: &str, _git_ref: &str, dest: &Path) -> Result<()> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            std::fs::create_dir_all(dest)?;
            std::fs::write(dest.join("README"), "hello")?;
            Ok(())
        }
    }

    async fn pool(workers: usize, requests: usize) -> (tempfile::TempDir, Arc<FileStore>, WorkerPool) {
        let dir = tempdir().unwrap();
        let config = Config::default().with_bundles_dir(dir.path().join("bundles"));
        let store = Arc::new(FileStore::open(&dir.path().join("requests")).unwrap());
        for _ in 0..requests {
            store
                .create(RequestSubmission {
                    repo: "https://example.com/repo.git".to_string(),
                    git_ref: "b".repeat(40),
                    pkg_managers: vec![],
                })
                .await
                .unwrap();
        }
        let pipeline = Pipeline::new(
            &config,
            store.clone(),
            Arc::new(SlowFetcher),
            Resolvers::new(),
            Arc::new(RecordingClient::default()),
        );
        (dir, store, WorkerPool::start(Arc::new(pipeline), workers))
    }

    #[tokio::test]
    async fn test_processes_every_request() {
        let (_dir, store, pool) = pool(3, 5).await;
        for id in 1..=5 {
            pool.submit(id).unwrap();
        }

        let outcomes = pool.shutdown().await;
        assert_eq!(outcomes.len(), 5);
        for request in store.list().await.unwrap() {
            assert_eq!(request.state, RequestState::Complete, "request {}", request.id);
        }
    }

    #[tokio::test]
    async fn test_duplicate_submission_refused() {
        let (_dir, _store, pool) = pool(1, 1).await;
        pool.submit(1).unwrap();
        assert!(matches!(pool.submit(1), Err(Error::RequestBusy(1))));

        let outcomes = pool.shutdown().await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].result.is_ok());
    }

    #[tokio::test]
    async fn test_failed_run_is_reported() {
        let (_dir, _store, pool) = pool(2, 0).await;
        pool.submit(9).unwrap();

        let outcomes = pool.shutdown().await;
        assert!(matches!(outcomes[0].result, Err(Error::RequestNotFound(9))));
        assert_eq!(outcomes[0].request_id, 9);
    }
}
