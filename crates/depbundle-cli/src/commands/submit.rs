use depbundle_core::{Config, RequestStore, RequestSubmission};
use miette::{IntoDiagnostic, Result};
use tracing::info;

/// Validate and persist a new request.
pub fn run(
    config: &Config,
    repo: String,
    git_ref: String,
    pkg_managers: Vec<String>,
    json: bool,
) -> Result<()> {
    // Same validation path as a raw API payload
    let payload = serde_json::json!({
        "repo": repo,
        "ref": git_ref,
        "pkg_managers": pkg_managers,
    });
    let submission = RequestSubmission::from_json(&payload).into_diagnostic()?;

    let store = super::open_store(config)?;
    let request = super::runtime()?
        .block_on(store.create(submission))
        .into_diagnostic()?;
    info!(request_id = request.id, "request submitted");

    if json {
        super::print_json(&request)
    } else {
        println!("Created request {}", request.id);
        Ok(())
    }
}
