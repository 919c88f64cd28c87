use anyhow::{Result, bail};
use std::path::Path;

use burrow_core::ops;
use burrow_core::source::HttpSource;
use burrow_schema::PackageName;

/// Remove packages by name, leaving their dependencies installed.
pub async fn uninstall(path: &Path, packages: &[String], index_url: Option<&str>) -> Result<()> {
    let env = super::open_environment(path)?;
    let config = super::load_config(index_url)?;

    let mut names = Vec::with_capacity(packages.len());
    for raw in packages {
        let name = PackageName::new(raw);
        if name.is_empty() {
            bail!("invalid package name '{raw}'");
        }
        names.push(name);
    }

    let source = HttpSource::new(&config)?;
    let report = ops::uninstall(&env, &names, &source, &config).await?;

    for op in &report.operations {
        println!("  {op}");
    }
    println!("Removed {} package(s).", report.operations.len());
    Ok(())
}
