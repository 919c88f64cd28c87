use anyhow::{Context, Result};
use std::path::Path;

/// Print the installed packages in lockfile form, one `name==version` per
/// line, sorted by name.
pub fn list(path: &Path) -> Result<()> {
    let env = super::open_environment(path)?;
    let installed = env
        .state_store()
        .read()
        .context("failed to read environment state")?;

    for (name, version) in &installed {
        println!("{name}=={version}");
    }
    Ok(())
}
