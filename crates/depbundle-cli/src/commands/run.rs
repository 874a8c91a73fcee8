use depbundle_core::{Config, Pipeline, RequestState};
use miette::{IntoDiagnostic, Result};

/// Run one request to completion in the foreground.
///
/// A request that ends failed is reported as an error after its output.
pub fn run(config: &Config, id: u64, json: bool) -> Result<()> {
    let store = super::open_store(config)?;
    let pipeline = Pipeline::from_config(config, store).into_diagnostic()?;

    let request = super::runtime()?
        .block_on(pipeline.run(id))
        .into_diagnostic()?;

    if json {
        super::print_json(&request)?;
    } else {
        super::print_request(&request);
    }

    if request.state == RequestState::Failed {
        miette::bail!("Request {id} failed: {}", request.state_reason);
    }
    Ok(())
}
