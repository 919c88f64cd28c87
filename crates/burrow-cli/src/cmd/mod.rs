pub mod create;
pub mod install;
pub mod list;
pub mod uninstall;

use anyhow::{Context, Result};
use std::path::Path;

use burrow_core::config::Config;

/// Shared config loading with the CLI-level index override applied.
pub(crate) fn load_config(index_url: Option<&str>) -> Result<Config> {
    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(url) = index_url {
        config.index_url = url.to_string();
    }
    Ok(config)
}

/// Open an environment with a friendlier error than the raw core one.
pub(crate) fn open_environment(path: &Path) -> Result<burrow_core::environment::Environment> {
    burrow_core::environment::Environment::open(path)
        .with_context(|| format!("failed to open environment at {}", path.display()))
}
