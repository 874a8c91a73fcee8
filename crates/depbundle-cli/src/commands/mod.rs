pub mod canonicalize;
pub mod cleanup;
pub mod deps;
pub mod process;
pub mod run;
pub mod status;
pub mod submit;
pub mod version;

use depbundle_core::request::Request;
use depbundle_core::{Config, FileStore};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::sync::Arc;

/// Open the request store under the configured bundles directory.
pub fn open_store(config: &Config) -> Result<Arc<FileStore>> {
    FileStore::open(&config.requests_dir())
        .map(Arc::new)
        .into_diagnostic()
}

pub fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().into_diagnostic()
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).into_diagnostic()?;
    println!("{json}");
    Ok(())
}

/// Human-readable summary of one request.
pub fn print_request(request: &Request) {
    let managers = if request.pkg_managers.is_empty() {
        "auto-detect".to_string()
    } else {
        request
            .pkg_managers
            .iter()
            .map(|kind| kind.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };

    println!("Request {}", request.id);
    println!("  Repo:           {}", request.repo);
    println!("  Ref:            {}", request.git_ref);
    println!("  Managers:       {managers}");
    println!("  State:          {}", request.state);
    println!("  Reason:         {}", request.state_reason);
    println!("  Updated:        {}", request.updated);
    if !request.packages.is_empty() {
        println!(
            "  Packages:       {} ({} dependencies)",
            request.packages.len(),
            request.dependencies.len()
        );
    }
    if let Some(archive) = &request.archive {
        println!("  Archive:        {}", archive.path.display());
        println!("  Digest:         {}", archive.digest);
    }
}
