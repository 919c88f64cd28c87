use dirs::home_dir;
use std::path::PathBuf;

/// Returns the burrow configuration directory, or None if the user's home
/// cannot be resolved.
pub fn try_burrow_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("BURROW_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".burrow"))
}

/// Global configuration file: ~/.burrow/config.toml
pub fn config_path() -> Option<PathBuf> {
    try_burrow_home().map(|h| h.join("config.toml"))
}

/// Extract the filename from a URL.
pub fn filename_from_url(url: &str) -> &str {
    url.split('/').next_back().unwrap_or("")
}
