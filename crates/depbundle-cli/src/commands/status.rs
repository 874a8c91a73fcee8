use depbundle_core::{Config, RequestStore};
use miette::{IntoDiagnostic, Result};

pub fn run(config: &Config, id: Option<u64>, json: bool) -> Result<()> {
    let store = super::open_store(config)?;
    let runtime = super::runtime()?;

    match id {
        Some(id) => {
            let request = runtime.block_on(store.get(id)).into_diagnostic()?;
            if json {
                super::print_json(&request)
            } else {
                super::print_request(&request);
                Ok(())
            }
        }
        None => {
            let requests = runtime.block_on(store.list()).into_diagnostic()?;
            if json {
                return super::print_json(&requests);
            }
            if requests.is_empty() {
                println!("No requests");
            }
            for request in &requests {
                println!(
                    "{:>6}  {:<11}  {}@{}",
                    request.id,
                    request.state.as_str(),
                    request.repo,
                    &request.git_ref[..request.git_ref.len().min(12)]
                );
            }
            Ok(())
        }
    }
}
