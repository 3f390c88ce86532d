//! End-to-end lifecycle tests against real shell scripts

use async_trait::async_trait;
use sidecar_supervisor::{
    CancellationToken, DefaultHooks, Error, ProcessConfig, ProcessSupervisor, ReadyCondition,
    ServerHooks, ShutdownState, SupervisorConfig, Timeouts,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn write_script(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "{}", body).unwrap();
    path
}

fn timeouts(ready_ms: u64) -> Timeouts {
    Timeouts::new(
        Duration::from_millis(ready_ms),
        Duration::from_millis(300),
        Duration::from_millis(1500),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn supervisor(script: PathBuf, marker: &str, count: usize) -> ProcessSupervisor {
    supervisor_with_hooks(script, marker, count, Arc::new(DefaultHooks))
}

fn supervisor_with_hooks(
    script: PathBuf,
    marker: &str,
    count: usize,
    hooks: Arc<dyn ServerHooks>,
) -> ProcessSupervisor {
    let config = SupervisorConfig::new(
        ProcessConfig::new("/bin/sh", script),
        ProcessConfig::new("/bin/sh", "/nonexistent/health.sh"),
        ReadyCondition::new(marker, count).unwrap(),
    )
    .with_timeouts(timeouts(5000));
    ProcessSupervisor::new(config, hooks).with_poll_interval(Duration::from_millis(20))
}

#[derive(Default)]
struct CountingHooks {
    backups: AtomicU32,
}

#[async_trait]
impl ServerHooks for CountingHooks {
    async fn backup(&self) -> sidecar_supervisor::Result<()> {
        self.backups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[smol_potat::test]
async fn test_ready_then_clean_exit() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let script = write_script(
        &dir,
        "start.sh",
        "echo Start\nsleep 0.1\necho Done\nsleep 0.1\necho Done\nsleep 0.2\nexit 0",
    );
    let mut supervisor = supervisor(script, "Done", 2);
    let token = CancellationToken::new();

    supervisor.start(&token)?;
    assert!(supervisor.pid().is_some());
    supervisor.wait().await?;
    supervisor.serve(&token).await?;

    assert!(supervisor.output().stdout.contents().contains("Start"));
    // Stopping an exited server does nothing.
    supervisor.stop().await;
    assert_eq!(supervisor.shutdown_state(), Some(ShutdownState::AlreadyStopped));
    Ok(())
}

#[smol_potat::test]
async fn test_start_twice_is_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let script = write_script(&dir, "start.sh", "echo Done\nexec sleep 30");
    let mut supervisor = supervisor(script, "Done", 1);
    let token = CancellationToken::new();

    supervisor.start(&token)?;
    assert!(matches!(supervisor.start(&token), Err(Error::AlreadyStarted)));

    supervisor.wait().await?;
    assert!(matches!(supervisor.wait().await, Err(Error::NotStarted)));

    supervisor.stop().await;
    assert_eq!(supervisor.shutdown_state(), Some(ShutdownState::StoppedGracefully));
    Ok(())
}

#[smol_potat::test]
async fn test_readiness_timeout_with_silent_server() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let script = write_script(&dir, "silent.sh", "exec sleep 30");
    let config = SupervisorConfig::new(
        ProcessConfig::new("/bin/sh", script),
        ProcessConfig::new("/bin/sh", "/nonexistent/health.sh"),
        ReadyCondition::new("Done", 1)?,
    )
    .with_timeouts(timeouts(500));
    let mut supervisor = ProcessSupervisor::new(config, Arc::new(DefaultHooks))
        .with_poll_interval(Duration::from_millis(20));
    let token = CancellationToken::new();

    supervisor.start(&token)?;
    let start = Instant::now();
    let result = supervisor.wait().await;
    let elapsed = start.elapsed();

    match result {
        Err(Error::ReadinessTimeout { output_tail, .. }) => {
            assert!(output_tail.is_empty());
        }
        other => panic!("expected ReadinessTimeout, got {:?}", other),
    }
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_secs(3));

    supervisor.stop().await;
    Ok(())
}

#[smol_potat::test]
async fn test_output_closed_before_ready() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let script = write_script(&dir, "dies.sh", "echo loading\nexit 1");
    let mut supervisor = supervisor(script, "Done", 1);

    supervisor.start(&CancellationToken::new())?;
    let start = Instant::now();

    assert!(matches!(supervisor.wait().await, Err(Error::OutputClosed)));
    assert!(start.elapsed() < Duration::from_secs(3));
    Ok(())
}

#[smol_potat::test]
async fn test_crash_after_ready() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let script = write_script(&dir, "crash.sh", "echo Done\nsleep 0.2\necho fatal >&2\nexit 3");
    let mut supervisor = supervisor(script, "Done", 1);
    let token = CancellationToken::new();

    supervisor.start(&token)?;
    supervisor.wait().await?;

    match supervisor.serve(&token).await {
        Err(Error::Crash { status, output_tail }) => {
            assert_eq!(status.code, Some(3));
            assert!(output_tail.contains("fatal"));
        }
        other => panic!("expected Crash, got {:?}", other),
    }
    Ok(())
}

#[smol_potat::test]
async fn test_cancellation_stops_server_and_serve_returns_ok() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    // SIGTERM stays ignored across exec, so only the kill stops it.
    let script = write_script(&dir, "stubborn.sh", "trap '' TERM\necho Done\nexec sleep 30");
    let hooks = Arc::new(CountingHooks::default());
    let mut supervisor = supervisor_with_hooks(script, "Done", 1, hooks.clone());
    let token = CancellationToken::new();

    supervisor.start(&token)?;
    supervisor.wait().await?;
    let pid = nix::unistd::Pid::from_raw(supervisor.pid().unwrap() as i32);

    let canceller = token.clone();
    smol::spawn(async move {
        smol::Timer::after(Duration::from_millis(100)).await;
        canceller.cancel();
    })
    .detach();

    supervisor.serve(&token).await?;

    // Joins the sequence the watcher started instead of running another.
    supervisor.stop().await;
    assert_eq!(supervisor.shutdown_state(), Some(ShutdownState::StoppedByKill));
    assert_eq!(hooks.backups.load(Ordering::SeqCst), 1);
    // Reaped, so the pid is gone.
    assert!(nix::sys::signal::kill(pid, None).is_err());
    Ok(())
}

#[smol_potat::test]
async fn test_repeated_stop_backs_up_once() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let script = write_script(&dir, "start.sh", "echo Done\nexec sleep 30");
    let hooks = Arc::new(CountingHooks::default());
    let mut supervisor = supervisor_with_hooks(script, "Done", 1, hooks.clone());

    supervisor.start(&CancellationToken::new())?;
    supervisor.wait().await?;

    futures::join!(supervisor.stop(), supervisor.stop());
    supervisor.stop().await;

    assert_eq!(hooks.backups.load(Ordering::SeqCst), 1);
    assert_eq!(supervisor.shutdown_state(), Some(ShutdownState::StoppedGracefully));
    Ok(())
}

#[smol_potat::test]
async fn test_environment_reaches_server() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let script = write_script(&dir, "env.sh", "echo \"motd=$MOTD\"\necho Done\nexec sleep 30");
    let config = SupervisorConfig::new(
        ProcessConfig::new("/bin/sh", script),
        ProcessConfig::new("/bin/sh", "/nonexistent/health.sh"),
        ReadyCondition::new("Done", 1)?,
    )
    .with_timeouts(timeouts(5000))
    .with_env("MOTD", "welcome aboard");
    let mut supervisor = ProcessSupervisor::new(config, Arc::new(DefaultHooks))
        .with_poll_interval(Duration::from_millis(20));

    supervisor.start(&CancellationToken::new())?;
    supervisor.wait().await?;

    assert!(supervisor.logs().await?.contains("motd=welcome aboard"));
    supervisor.stop().await;
    Ok(())
}
