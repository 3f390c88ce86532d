//! The orchestration platform the sidecar reports to.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

/// Default port of the Agones SDK REST gateway
pub const DEFAULT_AGONES_PORT: u16 = 9358;

/// Environment variable the Agones sidecar uses to advertise its port
pub const AGONES_PORT_ENV: &str = "AGONES_SDK_HTTP_PORT";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors talking to the platform
#[derive(thiserror::Error, Debug)]
pub enum PlatformError {
    /// Transport or client failure
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The platform answered with a non-success status
    #[error("{endpoint} returned HTTP {status}")]
    Status {
        /// Endpoint that was called
        endpoint: String,
        /// HTTP status code
        status: u16,
    },
}

/// Lifecycle notifications to the orchestration platform
#[async_trait]
pub trait Platform: Send + Sync {
    /// Announce that the server accepts players
    async fn mark_ready(&self) -> Result<(), PlatformError>;

    /// Send one health ping
    async fn report_health(&self) -> Result<(), PlatformError>;

    /// Ask the platform to tear the server down
    async fn shutdown(&self) -> Result<(), PlatformError>;
}

/// Agones SDK over its local REST gateway
#[derive(Debug, Clone)]
pub struct AgonesPlatform {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl AgonesPlatform {
    /// Create a client for the gateway at `base_url`
    pub fn new(base_url: impl Into<String>) -> Result<Self, PlatformError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Create a client for the local gateway
    ///
    /// Uses `port` if given, else `AGONES_SDK_HTTP_PORT`, else 9358.
    pub fn local(port: Option<u16>) -> Result<Self, PlatformError> {
        let env_port = std::env::var(AGONES_PORT_ENV).ok();
        let port = resolve_port(port, env_port.as_deref());
        Self::new(format!("http://localhost:{}", port))
    }

    /// Base URL of the gateway
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(&self, endpoint: &'static str) -> Result<(), PlatformError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let client = self.client.clone();

        // The blocking client must stay off the executor threads.
        let status = smol::unblock(move || {
            client
                .post(url)
                .json(&serde_json::json!({}))
                .send()
                .map(|response| response.status())
        })
        .await?;

        debug!(endpoint, status = status.as_u16(), "platform call");
        if status.is_success() {
            Ok(())
        } else {
            Err(PlatformError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            })
        }
    }
}

fn resolve_port(configured: Option<u16>, env_port: Option<&str>) -> u16 {
    configured
        .or_else(|| env_port.and_then(|p| p.trim().parse().ok()))
        .unwrap_or(DEFAULT_AGONES_PORT)
}

#[async_trait]
impl Platform for AgonesPlatform {
    async fn mark_ready(&self) -> Result<(), PlatformError> {
        self.post("/ready").await
    }

    async fn report_health(&self) -> Result<(), PlatformError> {
        self.post("/health").await
    }

    async fn shutdown(&self) -> Result<(), PlatformError> {
        self.post("/shutdown").await
    }
}

/// Platform that only logs, for running without an orchestrator
#[derive(Debug, Clone, Copy, Default)]
pub struct StandalonePlatform;

#[async_trait]
impl Platform for StandalonePlatform {
    async fn mark_ready(&self) -> Result<(), PlatformError> {
        info!("server ready (standalone)");
        Ok(())
    }

    async fn report_health(&self) -> Result<(), PlatformError> {
        debug!("server healthy (standalone)");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), PlatformError> {
        info!("shutdown requested (standalone)");
        Ok(())
    }
}
