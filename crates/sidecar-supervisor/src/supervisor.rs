//! The game server supervisor.

use crate::cancel::{CancellationToken, Latch};
use crate::config::SupervisorConfig;
use crate::health::{HealthCheckable, HealthProbe};
use crate::hooks::ServerHooks;
use crate::interceptor::{pump, CapturedOutput, OutputInterceptor};
use crate::readiness::{readiness_gate, Readiness, ReadySignal};
use crate::shutdown::{ShutdownSequencer, ShutdownState};
use crate::{Error, HealthCheckError, Result};
use async_trait::async_trait;
use futures::io::AsyncRead;
use sidecar_process::{LocalLauncher, LocalProcessHandle, ProcessHandle};
use smol::future;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Lines of captured output quoted in error messages
const OUTPUT_TAIL_LINES: usize = 20;

/// How long a crash report waits for the output pumps to drain
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// A started server process and its shutdown sequence
struct Running {
    process: Arc<LocalProcessHandle>,
    sequencer: Arc<ShutdownSequencer>,
    drained: Vec<Latch>,
}

/// Supervises one game server process
///
/// `start` launches the server, `wait` blocks until it is ready, `serve`
/// blocks until it exits and `stop` shuts it down. `stop` may be called from
/// any task at any time, concurrently with `serve`.
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    hooks: Arc<dyn ServerHooks>,
    probe: HealthProbe,
    output: CapturedOutput,
    launcher: LocalLauncher,
    poll_interval: Option<Duration>,
    running: Option<Running>,
    ready: Option<ReadySignal>,
}

impl ProcessSupervisor {
    /// Create a supervisor; nothing is launched until [`start`](Self::start)
    pub fn new(config: SupervisorConfig, hooks: Arc<dyn ServerHooks>) -> Self {
        let probe = HealthProbe::new(config.health.clone(), config.timeouts.health())
            .with_env(config.env.clone());
        Self {
            config,
            hooks,
            probe,
            output: CapturedOutput::default(),
            launcher: LocalLauncher,
            poll_interval: None,
            running: None,
            ready: None,
        }
    }

    /// Override the exit poll interval used while stopping
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = Some(poll_interval);
        self
    }

    /// The configuration this supervisor runs with
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Pid of the server, once started
    pub fn pid(&self) -> Option<u32> {
        self.running.as_ref().and_then(|r| r.process.pid())
    }

    /// Captured console output
    pub fn output(&self) -> &CapturedOutput {
        &self.output
    }

    /// A probe running the configured health command
    pub fn health_probe(&self) -> HealthProbe {
        self.probe.clone()
    }

    /// Final state of the shutdown sequence, once it has completed
    pub fn shutdown_state(&self) -> Option<ShutdownState> {
        self.running.as_ref().and_then(|r| r.sequencer.outcome())
    }

    /// Launch the server
    ///
    /// Cancelling `token` later stops the server.
    pub fn start(&mut self, token: &CancellationToken) -> Result<()> {
        if self.running.is_some() {
            return Err(Error::AlreadyStarted);
        }

        let start = &self.config.start;
        if !start.script.exists() {
            return Err(Error::Launch(format!(
                "start script {} does not exist",
                start.script.display()
            )));
        }

        let mut command = start.command();
        command.envs(&self.config.env);

        let (output, handle) = self
            .launcher
            .launch(&command)
            .map_err(|e| Error::Launch(e.to_string()))?;
        let process = Arc::new(handle);
        info!(pid = ?process.pid(), command = %command, "server started");

        let (gate, ready) = readiness_gate(self.config.ready.clone());
        let mut drained = Vec::with_capacity(2);
        if let Some(stdout) = output.stdout {
            let interceptor =
                OutputInterceptor::with_gate(std::io::stdout(), self.output.stdout.clone(), gate);
            drained.push(Self::spawn_pump("stdout", stdout, interceptor));
        }
        if let Some(stderr) = output.stderr {
            let interceptor =
                OutputInterceptor::passthrough(std::io::stderr(), self.output.stderr.clone());
            drained.push(Self::spawn_pump("stderr", stderr, interceptor));
        }

        let mut sequencer =
            ShutdownSequencer::new(process.clone(), self.hooks.clone(), &self.config.timeouts);
        if let Some(poll_interval) = self.poll_interval {
            sequencer = sequencer.with_poll_interval(poll_interval);
        }
        let sequencer = Arc::new(sequencer);

        Self::watch_cancellation(token.clone(), process.clone(), sequencer.clone());

        self.ready = Some(ready);
        self.running = Some(Running {
            process,
            sequencer,
            drained,
        });
        Ok(())
    }

    fn spawn_pump<R, W>(stream: &'static str, reader: R, interceptor: OutputInterceptor<W>) -> Latch
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: Write + Send + 'static,
    {
        let drained = Latch::new();
        let done = drained.clone();
        smol::spawn(async move {
            if let Err(e) = pump(reader, interceptor).await {
                warn!(stream, error = %e, "failed to read server output");
            }
            done.set();
        })
        .detach();
        drained
    }

    fn watch_cancellation(
        token: CancellationToken,
        process: Arc<LocalProcessHandle>,
        sequencer: Arc<ShutdownSequencer>,
    ) {
        smol::spawn(async move {
            let cancelled = future::or(
                async {
                    token.cancelled().await;
                    true
                },
                async {
                    let _ = process.wait().await;
                    false
                },
            )
            .await;

            if cancelled {
                info!("shutdown requested, stopping server");
                sequencer.stop().await;
            }
        })
        .detach();
    }

    /// Wait for the ready marker
    ///
    /// Fails after the ready timeout, or early if the server's output closes
    /// first. Can be called once per start.
    pub async fn wait(&mut self) -> Result<()> {
        let ready = self.ready.take().ok_or(Error::NotStarted)?;
        let timeout = self.config.timeouts.ready();
        let start = Instant::now();

        let readiness = future::or(async { Some(ready.recv().await) }, async {
            smol::Timer::after(timeout).await;
            None
        })
        .await;

        match readiness {
            Some(Readiness::Ready) => {
                info!(elapsed = ?start.elapsed(), "server is ready");
                Ok(())
            }
            Some(Readiness::Closed) => {
                error!(elapsed = ?start.elapsed(), "server output closed before ready");
                Err(Error::OutputClosed)
            }
            None => Err(Error::ReadinessTimeout {
                elapsed: start.elapsed(),
                output_tail: self.output.tail(OUTPUT_TAIL_LINES),
            }),
        }
    }

    /// Block until the server exits
    ///
    /// A successful exit, or any exit once `token` is cancelled, is `Ok`.
    pub async fn serve(&self, token: &CancellationToken) -> Result<()> {
        let running = self.running.as_ref().ok_or(Error::NotStarted)?;

        match running.process.wait().await {
            Ok(status) if status.success() || token.is_cancelled() => {
                info!(%status, "server exited");
                Ok(())
            }
            Ok(status) => {
                error!(%status, "server crashed");
                // Let the pumps catch the last words before quoting them.
                let drained = futures::future::join_all(running.drained.iter().map(|latch| latch.wait()));
                future::or(
                    async {
                        drained.await;
                    },
                    async {
                        smol::Timer::after(DRAIN_TIMEOUT).await;
                    },
                )
                .await;
                Err(Error::Crash {
                    status,
                    output_tail: self.output.tail(OUTPUT_TAIL_LINES),
                })
            }
            Err(e) if token.is_cancelled() => {
                debug!(error = %e, "stopped watching server after shutdown");
                Ok(())
            }
            Err(e) => Err(Error::Process(e)),
        }
    }

    /// Stop the server
    ///
    /// Idempotent; a no-op before `start` and once the server has exited.
    pub async fn stop(&self) {
        let Some(running) = &self.running else {
            debug!("stop requested before start");
            return;
        };
        let state = running.sequencer.stop().await;
        debug!(?state, "stop finished");
    }

    /// Run the health command once
    pub async fn healthy(&self) -> std::result::Result<bool, HealthCheckError> {
        self.probe.check().await
    }

    /// Game-specific status
    pub async fn status(&self) -> Result<String> {
        self.hooks.status().await
    }

    /// Recent server logs
    pub async fn logs(&self) -> Result<String> {
        self.hooks.logs(&self.output).await
    }

    /// Persist game state
    pub async fn backup(&self) -> Result<()> {
        self.hooks.backup().await
    }
}

#[async_trait]
impl HealthCheckable for ProcessSupervisor {
    async fn healthy(&self) -> std::result::Result<bool, HealthCheckError> {
        self.probe.check().await
    }
}
