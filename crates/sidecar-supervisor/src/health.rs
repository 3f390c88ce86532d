//! Health checking and relaying.
//!
//! [`HealthProbe`] runs the configured health script once and maps its exit
//! code to a verdict. [`HealthReporter`] turns verdicts into periodic health
//! pings to the platform and decides when repeated failures become fatal.

use crate::cancel::CancellationToken;
use crate::config::{HealthReporting, ProcessConfig};
use crate::platform::Platform;
use crate::{Error, HealthCheckError, Result};
use async_trait::async_trait;
use sidecar_process::LocalLauncher;
use smol::future;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Anything that can produce a health verdict
#[async_trait]
pub trait HealthCheckable: Send + Sync {
    /// `Ok(true)` if healthy, `Ok(false)` if not, `Err` if no verdict
    async fn healthy(&self) -> std::result::Result<bool, HealthCheckError>;
}

/// Runs the health command with a timeout
#[derive(Debug, Clone)]
pub struct HealthProbe {
    process: ProcessConfig,
    timeout: Duration,
    env: HashMap<String, String>,
    launcher: LocalLauncher,
}

impl HealthProbe {
    /// Create a probe for `process`, bounded by `timeout`
    pub fn new(process: ProcessConfig, timeout: Duration) -> Self {
        Self {
            process,
            timeout,
            env: HashMap::new(),
            launcher: LocalLauncher,
        }
    }

    /// Extra environment for the health command
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Run the health command once
    ///
    /// Exit 0 is healthy, any other exit is unhealthy. The command's output
    /// is discarded and it is killed when the timeout expires. A missing
    /// script is an error, not an unhealthy verdict.
    pub async fn check(&self) -> std::result::Result<bool, HealthCheckError> {
        if !self.process.script.exists() {
            return Err(HealthCheckError::Launch(sidecar_process::Error::spawn_failed(
                format!("health script {} does not exist", self.process.script.display()),
            )));
        }

        let mut command = self.process.command();
        command.envs(&self.env);
        let start = Instant::now();

        let result = future::or(
            async { Some(self.launcher.execute(&command).await) },
            async {
                smol::Timer::after(self.timeout).await;
                None
            },
        )
        .await;

        match result {
            Some(Ok(status)) => {
                debug!(%status, elapsed = ?start.elapsed(), "health check finished");
                Ok(status.success())
            }
            Some(Err(e)) => Err(HealthCheckError::Launch(e)),
            None => {
                warn!(timeout = ?self.timeout, "health check timed out");
                Err(HealthCheckError::Timeout(self.timeout))
            }
        }
    }
}

#[async_trait]
impl HealthCheckable for HealthProbe {
    async fn healthy(&self) -> std::result::Result<bool, HealthCheckError> {
        self.check().await
    }
}

/// Periodic health relay to the platform
#[derive(Debug, Clone, Copy)]
pub struct HealthReporter {
    reporting: HealthReporting,
}

impl HealthReporter {
    /// Create a reporter with the given cadence and failure threshold
    pub fn new(reporting: HealthReporting) -> Self {
        Self { reporting }
    }

    /// Report health until cancelled or until failures pile up
    ///
    /// Unhealthy verdicts skip the ping but count as a successful tick.
    /// Probe errors and relay errors count towards the failure threshold.
    pub async fn run<H, P>(&self, target: &H, platform: &P, token: &CancellationToken) -> Result<()>
    where
        H: HealthCheckable + ?Sized,
        P: Platform + ?Sized,
    {
        let threshold = self.reporting.failure_threshold.max(1);
        let mut failures = 0u32;

        loop {
            // The next tick is one interval after the previous one finished.
            let cancelled = future::or(
                async {
                    smol::Timer::after(self.reporting.interval).await;
                    false
                },
                async {
                    token.cancelled().await;
                    true
                },
            )
            .await;
            if cancelled {
                debug!("health reporting stopped");
                return Ok(());
            }

            let outcome = match target.healthy().await {
                Ok(true) => platform
                    .report_health()
                    .await
                    .map_err(|e| format!("failed to report health: {}", e)),
                Ok(false) => {
                    warn!("server unhealthy, skipping health report");
                    Ok(())
                }
                Err(e) => Err(e.to_string()),
            };

            match outcome {
                Ok(()) => failures = 0,
                Err(last_error) => {
                    failures += 1;
                    warn!(failures, threshold, error = %last_error, "health tick failed");
                    if failures >= threshold {
                        return Err(Error::HealthReporting {
                            failures,
                            last_error,
                        });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::PlatformError;
    use std::collections::VecDeque;
    use std::io::Write;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn script(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", body).unwrap();
        file
    }

    fn probe(script: &tempfile::NamedTempFile, timeout: Duration) -> HealthProbe {
        HealthProbe::new(ProcessConfig::new("/bin/sh", script.path()), timeout)
    }

    #[smol_potat::test]
    async fn test_probe_verdicts() {
        let healthy = script("echo fine; exit 0");
        assert!(probe(&healthy, Duration::from_secs(5)).check().await.unwrap());

        let unhealthy = script("exit 1");
        assert!(!probe(&unhealthy, Duration::from_secs(5)).check().await.unwrap());
    }

    #[smol_potat::test]
    async fn test_probe_timeout() {
        let slow = script("sleep 30");
        let start = Instant::now();

        let result = probe(&slow, Duration::from_millis(200)).check().await;

        assert!(matches!(result, Err(HealthCheckError::Timeout(_))));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[smol_potat::test]
    async fn test_probe_launch_failure() {
        let probe = HealthProbe::new(
            ProcessConfig::new("/nonexistent/shell", "/health.sh"),
            Duration::from_secs(1),
        );
        assert!(matches!(probe.check().await, Err(HealthCheckError::Launch(_))));
    }

    #[smol_potat::test]
    async fn test_probe_missing_script_is_error() {
        let probe = HealthProbe::new(
            ProcessConfig::new("/bin/sh", "/nonexistent/health.sh"),
            Duration::from_secs(2),
        );
        match probe.check().await {
            Err(HealthCheckError::Launch(e)) => {
                assert!(e.to_string().contains("/nonexistent/health.sh"));
            }
            other => panic!("expected Launch error, got {:?}", other),
        }
    }

    #[smol_potat::test]
    async fn test_probe_sees_extra_environment() {
        let check = script("test \"$RCON_PORT\" = 27015");
        let bare = probe(&check, Duration::from_secs(5));
        assert!(!bare.check().await.unwrap());

        let env = HashMap::from([("RCON_PORT".to_string(), "27015".to_string())]);
        let with_env = bare.with_env(env);
        assert!(with_env.check().await.unwrap());
    }

    /// Returns scripted verdicts, then healthy forever
    struct Scripted(Mutex<VecDeque<std::result::Result<bool, HealthCheckError>>>);

    impl Scripted {
        fn new(verdicts: Vec<std::result::Result<bool, HealthCheckError>>) -> Self {
            Self(Mutex::new(verdicts.into()))
        }
    }

    #[async_trait]
    impl HealthCheckable for Scripted {
        async fn healthy(&self) -> std::result::Result<bool, HealthCheckError> {
            self.0.lock().unwrap().pop_front().unwrap_or(Ok(true))
        }
    }

    #[derive(Default)]
    struct CountingPlatform {
        reports: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl Platform for CountingPlatform {
        async fn mark_ready(&self) -> std::result::Result<(), PlatformError> {
            Ok(())
        }

        async fn report_health(&self) -> std::result::Result<(), PlatformError> {
            self.reports.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(PlatformError::Status {
                    endpoint: "/health".into(),
                    status: 503,
                })
            } else {
                Ok(())
            }
        }

        async fn shutdown(&self) -> std::result::Result<(), PlatformError> {
            Ok(())
        }
    }

    fn reporter(threshold: u32) -> HealthReporter {
        HealthReporter::new(HealthReporting {
            interval: Duration::from_millis(10),
            failure_threshold: threshold,
        })
    }

    fn timeout() -> HealthCheckError {
        HealthCheckError::Timeout(Duration::from_secs(5))
    }

    #[smol_potat::test]
    async fn test_reports_only_when_healthy() {
        let target = Scripted::new(vec![Ok(true), Ok(false), Ok(true)]);
        let platform = CountingPlatform::default();
        let token = CancellationToken::new();

        let canceller = token.clone();
        smol::spawn(async move {
            smol::Timer::after(Duration::from_millis(25)).await;
            canceller.cancel();
        })
        .detach();

        // Two ticks fit before cancellation; an unhealthy one would be skipped.
        let result = future::or(reporter(3).run(&target, &platform, &token), async {
            smol::Timer::after(Duration::from_secs(5)).await;
            Err(Error::NotStarted)
        })
        .await;

        assert!(result.is_ok());
        assert!(platform.reports.load(Ordering::SeqCst) >= 1);
    }

    #[smol_potat::test]
    async fn test_consecutive_failures_are_fatal() {
        let target = Scripted::new(vec![Err(timeout()), Err(timeout()), Err(timeout())]);
        let platform = CountingPlatform::default();

        let result = reporter(3).run(&target, &platform, &CancellationToken::new()).await;

        match result {
            Err(Error::HealthReporting { failures, .. }) => assert_eq!(failures, 3),
            other => panic!("expected HealthReporting, got {:?}", other),
        }
        assert_eq!(platform.reports.load(Ordering::SeqCst), 0);
    }

    #[smol_potat::test]
    async fn test_success_resets_failure_count() {
        let target = Scripted::new(vec![
            Err(timeout()),
            Err(timeout()),
            Ok(false),
            Err(timeout()),
            Err(timeout()),
            Err(timeout()),
        ]);
        let platform = CountingPlatform::default();

        let result = reporter(3).run(&target, &platform, &CancellationToken::new()).await;

        // Only the last three errors are consecutive.
        assert!(matches!(result, Err(Error::HealthReporting { failures: 3, .. })));
    }

    #[smol_potat::test]
    async fn test_relay_errors_count_as_failures() {
        let target = Scripted::new(vec![]);
        let platform = CountingPlatform {
            fail: true,
            ..Default::default()
        };

        let result = reporter(1).run(&target, &platform, &CancellationToken::new()).await;

        assert!(matches!(result, Err(Error::HealthReporting { failures: 1, .. })));
        assert_eq!(platform.reports.load(Ordering::SeqCst), 1);
    }

    #[smol_potat::test]
    async fn test_cancelled_token_ends_loop() {
        let token = CancellationToken::new();
        token.cancel();

        let result = reporter(1)
            .run(&Scripted::new(vec![Err(timeout())]), &StandaloneCheck, &token)
            .await;
        assert!(result.is_ok());
    }

    /// Takes longer than the reporting interval, recording when each run
    /// started and finished; cancels after `runs` checks
    struct SlowCheck {
        runs: usize,
        duration: Duration,
        token: CancellationToken,
        spans: Mutex<Vec<(Instant, Instant)>>,
    }

    #[async_trait]
    impl HealthCheckable for SlowCheck {
        async fn healthy(&self) -> std::result::Result<bool, HealthCheckError> {
            let started = Instant::now();
            smol::Timer::after(self.duration).await;
            let mut spans = self.spans.lock().unwrap();
            spans.push((started, Instant::now()));
            if spans.len() >= self.runs {
                self.token.cancel();
            }
            Ok(true)
        }
    }

    #[smol_potat::test]
    async fn test_slow_checks_do_not_bunch_up() {
        let token = CancellationToken::new();
        let target = SlowCheck {
            runs: 3,
            duration: Duration::from_millis(120),
            token: token.clone(),
            spans: Mutex::new(Vec::new()),
        };
        let reporter = HealthReporter::new(HealthReporting {
            interval: Duration::from_millis(50),
            failure_threshold: 1,
        });

        reporter
            .run(&target, &CountingPlatform::default(), &token)
            .await
            .unwrap();

        let spans = target.spans.lock().unwrap();
        assert_eq!(spans.len(), 3);
        for pair in spans.windows(2) {
            let idle = pair[1].0.duration_since(pair[0].1);
            assert!(idle >= Duration::from_millis(45), "checks {:?} apart", idle);
        }
    }

    struct StandaloneCheck;

    #[async_trait]
    impl Platform for StandaloneCheck {
        async fn mark_ready(&self) -> std::result::Result<(), PlatformError> {
            Ok(())
        }

        async fn report_health(&self) -> std::result::Result<(), PlatformError> {
            panic!("must not report after cancellation");
        }

        async fn shutdown(&self) -> std::result::Result<(), PlatformError> {
            Ok(())
        }
    }
}
