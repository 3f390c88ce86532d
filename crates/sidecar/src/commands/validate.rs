use anyhow::{Context, Result};
use sidecar_config::{PlatformConfig, resolver};
use std::path::Path;

pub async fn run(config_path: &Path, strict: bool) -> Result<()> {
    println!("Validating {}...", config_path.display());

    let config = super::load_config(config_path, strict)?;

    // Catch what only the conversion checks, such as timeout ordering.
    let env = std::env::vars().collect();
    config
        .to_supervisor_config(&env)
        .context("Configuration cannot be used")?;

    println!("✓ Configuration valid");
    println!("  Name: {}", config.display_name());
    println!("  Start: {} {}", config.start.shell, config.start.script);
    println!("  Health: {} {}", config.health.shell, config.health.script);
    match &config.backup {
        Some(backup) => println!("  Backup: {} {}", backup.shell, backup.script),
        None => println!("  Backup: none"),
    }
    println!(
        "  Ready: {:?} x{}",
        config.ready.message, config.ready.count
    );
    println!(
        "  Timeouts: ready {}s, stop {}s/{}s, health {}s",
        config.timeouts.ready,
        config.timeouts.stop_soft,
        config.timeouts.stop_hard,
        config.timeouts.health
    );
    match config.platform {
        PlatformConfig::Agones { port: Some(port) } => println!("  Platform: agones (port {})", port),
        PlatformConfig::Agones { port: None } => println!("  Platform: agones"),
        PlatformConfig::Standalone => println!("  Platform: standalone"),
    }

    // Unset references were left in place by the lenient resolver.
    let raw = std::fs::read_to_string(config_path)?;
    let missing: Vec<String> = resolver::find_references(&raw)
        .into_iter()
        .filter(|name| std::env::var(name).is_err())
        .collect();
    if !missing.is_empty() {
        println!(
            "  ⚠ Unset environment variables (defaults apply where given): {}",
            missing.join(", ")
        );
    }

    for setting in &config.settings {
        if std::env::var(&setting.name).is_err() {
            println!(
                "  ⚠ Setting source {} is unset, {} will not be passed",
                setting.name, setting.value
            );
        }
    }

    Ok(())
}
