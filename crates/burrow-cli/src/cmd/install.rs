use anyhow::{Context, Result};
use std::path::Path;

use burrow_core::ops;
use burrow_core::source::HttpSource;
use burrow_schema::PackageSpec;

/// Resolve and transactionally install the given requirements.
pub async fn install(path: &Path, specs: &[String], index_url: Option<&str>) -> Result<()> {
    let env = super::open_environment(path)?;
    let config = super::load_config(index_url)?;

    let parsed: Vec<PackageSpec> = specs
        .iter()
        .map(|s| PackageSpec::parse(s).with_context(|| format!("invalid requirement '{s}'")))
        .collect::<Result<_>>()?;

    let source = HttpSource::new(&config)?;
    let report = ops::install(&env, &parsed, &source, &config).await?;

    if report.operations.is_empty() {
        println!("Requirements already satisfied.");
    } else {
        for op in &report.operations {
            println!("  {op}");
        }
        println!("Applied {} operation(s).", report.operations.len());
    }
    Ok(())
}
