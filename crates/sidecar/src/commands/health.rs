use anyhow::{Context, Result};
use sidecar_supervisor::HealthProbe;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub async fn run(config_path: &Path, strict: bool) -> Result<()> {
    let config = super::load_config(config_path, strict)?;
    let env: HashMap<String, String> = std::env::vars().collect();
    let probe = HealthProbe::new(
        config.health.to_process_config(),
        Duration::from_secs(config.timeouts.health),
    )
    .with_env(config.remap_settings(&env));

    let healthy = probe.check().await.context("Health check could not run")?;
    if healthy {
        println!("Server is healthy");
    } else {
        println!("Server is unhealthy");
    }

    Ok(())
}
