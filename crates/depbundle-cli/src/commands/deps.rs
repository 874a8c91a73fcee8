use depbundle_core::{Config, RequestStore};
use miette::{IntoDiagnostic, Result};

/// Print the packages and dependencies recorded for a request so far.
pub fn run(config: &Config, id: u64, json: bool) -> Result<()> {
    let store = super::open_store(config)?;
    let request = super::runtime()?
        .block_on(store.get(id))
        .into_diagnostic()?;

    if json {
        return super::print_json(&serde_json::json!({
            "packages": request.packages,
            "dependencies": request.dependencies,
        }));
    }

    println!("Packages:");
    for package in &request.packages {
        println!("  {} {}@{}", package.kind, package.name, package.version);
    }
    println!("Dependencies:");
    for dep in &request.dependencies {
        let dev = if dep.is_dev() { " (dev)" } else { "" };
        println!("  {} {}@{}{dev}", dep.kind, dep.name, dep.version);
        if let Some(replaced) = &dep.replaces {
            println!("    replaces {}@{}", replaced.name, replaced.version);
        }
    }
    Ok(())
}
