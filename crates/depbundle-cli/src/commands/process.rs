use depbundle_core::{Config, Pipeline, RequestState, RequestStore, WorkerPool};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Serialize)]
struct ProcessedRequest {
    id: u64,
    state: Option<RequestState>,
    reason: String,
}

/// Run every `initiated` request through a worker pool and wait for all of
/// them.
pub fn run(config: &Config, json: bool) -> Result<()> {
    let store = super::open_store(config)?;
    let pipeline = Arc::new(Pipeline::from_config(config, store.clone()).into_diagnostic()?);

    let processed = super::runtime()?.block_on(async {
        let pending: Vec<u64> = store
            .list()
            .await?
            .into_iter()
            .filter(|request| request.state == RequestState::Initiated)
            .map(|request| request.id)
            .collect();
        info!(requests = pending.len(), workers = config.workers, "processing requests");

        let pool = WorkerPool::start(pipeline, config.workers);
        for id in pending {
            pool.submit(id)?;
        }

        let mut processed: Vec<ProcessedRequest> = pool
            .shutdown()
            .await
            .into_iter()
            .map(|outcome| match outcome.result {
                Ok(request) => ProcessedRequest {
                    id: request.id,
                    state: Some(request.state),
                    reason: request.state_reason,
                },
                Err(e) => ProcessedRequest {
                    id: outcome.request_id,
                    state: None,
                    reason: e.to_string(),
                },
            })
            .collect();
        processed.sort_by_key(|p| p.id);
        Ok::<_, depbundle_core::Error>(processed)
    });
    let processed = processed.into_diagnostic()?;

    if json {
        super::print_json(&processed)?;
    } else if processed.is_empty() {
        println!("No initiated requests");
    } else {
        for p in &processed {
            let state = p.state.map_or("error", RequestState::as_str);
            println!("{:>6}  {state:<10}  {}", p.id, p.reason);
        }
    }

    let unfinished: Vec<String> = processed
        .iter()
        .filter(|p| p.state != Some(RequestState::Complete))
        .map(|p| p.id.to_string())
        .collect();
    if !unfinished.is_empty() {
        miette::bail!("Request(s) did not complete: {}", unfinished.join(", "));
    }
    Ok(())
}
