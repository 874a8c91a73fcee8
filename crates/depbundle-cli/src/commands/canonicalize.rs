use depbundle_core::{canonical_packages, deep_sort, Package};
use depbundle_util::fs::atomic_write;
use miette::{IntoDiagnostic, Result, WrapErr};
use serde_json::Value;
use std::path::Path;

/// Canonicalize a JSON document.
///
/// A `packages` list is sorted and deduplicated like bundle metadata; the
/// whole document is then deep-sorted. The output is always JSON, so
/// `--json` changes nothing.
pub fn run(file: &Path, output: Option<&Path>, _json: bool) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to read {}", file.display()))?;
    let document: Value = serde_json::from_str(&content)
        .into_diagnostic()
        .wrap_err_with(|| format!("{} is not valid JSON", file.display()))?;

    let mut rendered = serde_json::to_string_pretty(&canonicalize(document)?).into_diagnostic()?;
    rendered.push('\n');

    match output {
        Some(path) => atomic_write(path, rendered.as_bytes()).into_diagnostic(),
        None => {
            print!("{rendered}");
            Ok(())
        }
    }
}

fn canonicalize(mut document: Value) -> Result<Value> {
    if let Some(packages) = document.get_mut("packages") {
        let parsed: Vec<Package> = serde_json::from_value(packages.take())
            .into_diagnostic()
            .wrap_err("The \"packages\" list is malformed")?;
        *packages = serde_json::to_value(canonical_packages(parsed)).into_diagnostic()?;
    }
    Ok(deep_sort(document))
}
