use anyhow::{Context, Result};
use std::path::Path;

use burrow_core::environment::{Environment, SystemRunner};

/// Create a fresh environment at `path`.
pub fn create(path: &Path, python_version: Option<&str>) -> Result<()> {
    let env = Environment::materialize(path, python_version, &SystemRunner)
        .with_context(|| format!("failed to create environment at {}", path.display()))?;

    println!(
        "Created environment at {} (python {})",
        env.root().display(),
        env.python_version()
    );
    Ok(())
}
