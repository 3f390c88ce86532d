pub mod health;
pub mod run;
pub mod validate;

use anyhow::{Context, Result};
use sidecar_config::{Config, ResolutionContext};
use std::path::Path;

/// Load the configuration with `${VAR}` substitution from the environment
pub fn load_config(path: &Path, strict: bool) -> Result<Config> {
    let context = ResolutionContext::from_env().strict(strict);
    sidecar_config::load(path, &context)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}
