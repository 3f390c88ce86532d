use anyhow::{Context, Result};
use sidecar_config::PlatformConfig;
use sidecar_supervisor::{
    AgonesPlatform, CancellationToken, CommandHooks, HealthReporter, Platform, ProcessSupervisor,
    StandalonePlatform, signal_context,
};
use smol::future;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub async fn run(config_path: &Path, strict: bool) -> Result<()> {
    let config = super::load_config(config_path, strict)?;
    let env: HashMap<String, String> = std::env::vars().collect();
    let supervisor_config = config
        .to_supervisor_config(&env)
        .context("Configuration cannot be used")?;

    let token = signal_context().context("Failed to install signal handlers")?;
    let platform: Arc<dyn Platform> = match config.platform {
        PlatformConfig::Agones { port } => Arc::new(
            AgonesPlatform::local(port).context("Failed to create Agones SDK client")?,
        ),
        PlatformConfig::Standalone => Arc::new(StandalonePlatform),
    };

    let reporter = HealthReporter::new(supervisor_config.reporting);
    let hooks = Arc::new(
        CommandHooks::new(config.backup_process()).with_env(supervisor_config.env.clone()),
    );
    let mut supervisor = ProcessSupervisor::new(supervisor_config, hooks);

    info!(name = config.display_name(), "starting game server");
    let result = lifecycle(&mut supervisor, platform.as_ref(), &reporter, &token).await;

    // Teardown runs whatever ended the lifecycle.
    token.cancel();
    supervisor.stop().await;
    if let Some(state) = supervisor.shutdown_state() {
        info!(?state, "game server stopped");
    }
    if let Err(e) = platform.shutdown().await {
        warn!(error = %e, "failed to request shutdown from platform");
    }

    result
}

/// Start, then relay health while waiting for readiness and serving
async fn lifecycle(
    supervisor: &mut ProcessSupervisor,
    platform: &dyn Platform,
    reporter: &HealthReporter,
    token: &CancellationToken,
) -> Result<()> {
    supervisor.start(token).context("Failed to start game server")?;

    let probe = supervisor.health_probe();
    future::or(serve_until_exit(supervisor, platform, token), async {
        // A cancelled reporter leaves the outcome to the server.
        match reporter.run(&probe, platform, token).await {
            Ok(()) => future::pending().await,
            Err(e) => Err(e).context("Health reporting failed"),
        }
    })
    .await
}

async fn serve_until_exit(
    supervisor: &mut ProcessSupervisor,
    platform: &dyn Platform,
    token: &CancellationToken,
) -> Result<()> {
    let ready = future::or(async { Some(supervisor.wait().await) }, async {
        token.cancelled().await;
        None
    })
    .await;
    match ready {
        Some(result) => result.context("Game server did not become ready")?,
        None => {
            info!("shutdown requested before the server became ready");
            return Ok(());
        }
    }

    platform
        .mark_ready()
        .await
        .context("Failed to mark game server ready")?;

    supervisor
        .serve(token)
        .await
        .context("Game server stopped unexpectedly")
}
