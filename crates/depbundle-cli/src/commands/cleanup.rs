use depbundle_core::proxy::NexusClient;
use depbundle_core::{Config, ProxyFamily, ProxyLifecycle};
use miette::{IntoDiagnostic, Result};
use std::sync::Arc;

/// Release the proxy repository and principal of `(id, family)`.
///
/// Works for grants that were never prepared or were already released.
pub fn run(config: &Config, id: u64, family: &str, json: bool) -> Result<()> {
    let Some(family) = ProxyFamily::parse(family) else {
        let known: Vec<&str> = ProxyFamily::ALL.iter().map(|f| f.as_str()).collect();
        miette::bail!(
            "Unknown proxy family '{family}' (expected one of: {})",
            known.join(", ")
        );
    };

    let client = NexusClient::new(&config.proxy).into_diagnostic()?;
    let lifecycle = ProxyLifecycle::new(Arc::new(client), config.proxy.clone());
    super::runtime()?
        .block_on(lifecycle.cleanup(id, family))
        .into_diagnostic()?;

    if json {
        super::print_json(&serde_json::json!({
            "request_id": id,
            "family": family,
            "released": true,
        }))
    } else {
        println!("Released the {family} proxy resources of request {id}");
        Ok(())
    }
}
