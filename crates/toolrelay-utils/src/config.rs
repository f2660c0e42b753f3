//! Configuration file lookup

use anyhow::{Context, bail};
use std::path::{Path, PathBuf};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "TOOLRELAY_CONFIG";

/// File looked up in the working directory when nothing else is given
pub const DEFAULT_CONFIG_FILE: &str = "toolrelay.json";

/// Pick the configuration file: explicit path, then `TOOLRELAY_CONFIG`,
/// then `toolrelay.json` in the working directory
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    match std::env::var(CONFIG_ENV) {
        Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
        _ => PathBuf::from(DEFAULT_CONFIG_FILE),
    }
}

/// Resolve the configuration file and make sure it exists
pub fn require_config(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    let path = config_path(explicit);

    if !path.is_file() {
        bail!(
            "Configuration file {} not found (pass --config or set {})",
            path.display(),
            CONFIG_ENV
        );
    }

    path.canonicalize()
        .with_context(|| format!("Failed to resolve {}", path.display()))
}
