// src/proxy/backend.rs
use super::forward::{ForwardError, ForwardRequest, Forwarder};
use chrono::{DateTime, Utc};
use hyper::{Body, Response};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio::time::timeout;
use url::Url;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// One upstream instance. Liveness is guarded by a lock owned by this
/// backend alone, so updates to different backends never contend.
pub struct Backend {
    pub id: String,
    pub url: Url,
    alive: RwLock<bool>,
    last_probe: RwLock<Option<DateTime<Utc>>>,
    probe_timeout: Duration,
    forwarder: Arc<dyn Forwarder>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub id: String,
    pub url: String,
    pub alive: bool,
    pub last_probe: Option<DateTime<Utc>>,
}

impl Backend {
    /// Backends start out alive.
    pub fn new(url: Url, forwarder: Arc<dyn Forwarder>, probe_timeout: Duration) -> Self {
        let id = format!(
            "{}:{}",
            url.host_str().unwrap_or("unknown"),
            url.port_or_known_default().unwrap_or(80)
        );

        Self {
            id,
            url,
            alive: RwLock::new(true),
            last_probe: RwLock::new(None),
            probe_timeout,
            forwarder,
        }
    }

    pub async fn is_alive(&self) -> bool {
        *self.alive.read().await
    }

    /// Sets the flag and returns the previous value.
    pub async fn set_alive(&self, alive: bool) -> bool {
        let mut status = self.alive.write().await;
        std::mem::replace(&mut *status, alive)
    }

    pub async fn forward(&self, req: &ForwardRequest) -> Result<Response<Body>, ForwardError> {
        self.forwarder.forward(req, &self.url).await
    }

    /// Connect-and-close reachability check. A single failure is final for
    /// this cycle; nothing is retried here.
    pub async fn probe(&self) -> bool {
        let reachable = match self.probe_target() {
            Some((host, port)) => {
                match timeout(self.probe_timeout, TcpStream::connect((host.as_str(), port))).await {
                    Ok(Ok(stream)) => {
                        drop(stream);
                        true
                    }
                    Ok(Err(e)) => {
                        tracing::debug!(backend = %self.id, error = %e, "host unreachable");
                        false
                    }
                    Err(_) => {
                        tracing::debug!(backend = %self.id, "probe timed out after {:?}", self.probe_timeout);
                        false
                    }
                }
            }
            None => false,
        };

        self.record_probe().await;
        reachable
    }

    pub async fn last_probe(&self) -> Option<DateTime<Utc>> {
        *self.last_probe.read().await
    }

    pub async fn status(&self) -> BackendStatus {
        BackendStatus {
            id: self.id.clone(),
            url: self.url.to_string(),
            alive: self.is_alive().await,
            last_probe: self.last_probe().await,
        }
    }

    async fn record_probe(&self) {
        let mut last = self.last_probe.write().await;
        *last = Some(Utc::now());
    }

    fn probe_target(&self) -> Option<(String, u16)> {
        // host_str keeps the brackets around IPv6 literals
        let host = self.url.host_str()?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        Some((host.to_string(), self.url.port_or_known_default()?))
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("id", &self.id)
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}
