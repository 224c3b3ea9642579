// src/load_balancer/dispatcher.rs
use crate::config::DEFAULT_MAX_BODY_BYTES;
use crate::metrics::{MetricsCollector, Timer};
use crate::proxy::{Backend, BackendPool, BodyError, ForwardRequest};
use crate::retry::{AttemptContext, RetryStrategy, Transition};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Request, Response, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

pub const UNAVAILABLE_BODY: &str = "Service not available";

/// Terminal failures of a dispatch. Callers cannot tell them apart: both
/// become the same 503.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no live backend available")]
    NoPeerAvailable,

    #[error("gave up after {failovers} failovers")]
    AttemptsExhausted { failovers: u32 },
}

impl DispatchError {
    pub fn reason(&self) -> &'static str {
        match self {
            DispatchError::NoPeerAvailable => "no_peer",
            DispatchError::AttemptsExhausted { .. } => "attempts_exhausted",
        }
    }
}

impl From<DispatchError> for Response<Body> {
    fn from(_: DispatchError) -> Self {
        text_response(StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE_BODY)
    }
}

pub(crate) fn text_response(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Request entry point: picks a backend, forwards, and owns every retry and
/// failover decision for the request.
pub struct Balancer {
    pool: Arc<BackendPool>,
    strategy: RetryStrategy,
    metrics: Option<Arc<MetricsCollector>>,
    max_body_bytes: usize,
}

impl Balancer {
    pub fn new(
        pool: Arc<BackendPool>,
        strategy: RetryStrategy,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        Self {
            pool,
            strategy,
            metrics,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Caps the inbound body size; anything larger is answered with 413.
    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn pool(&self) -> &Arc<BackendPool> {
        &self.pool
    }

    /// Buffers and dispatches one inbound request. Always produces a
    /// response: the upstream's, a 503, a 413 for an oversized body, or a
    /// 400 for an unreadable one.
    pub async fn handle(&self, req: Request<Body>, client: Option<SocketAddr>) -> Response<Body> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "request",
            id = %request_id,
            method = %req.method(),
            path = %req.uri().path(),
        );

        async move {
            let timer = Timer::new();

            let req = match ForwardRequest::from_hyper(req, client, self.max_body_bytes).await {
                Ok(req) => req,
                Err(e @ BodyError::TooLarge { .. }) => {
                    warn!("Rejecting request: {}", e);
                    self.record_request("too_large", &timer);
                    return text_response(StatusCode::PAYLOAD_TOO_LARGE, "Payload too large");
                }
                Err(e) => {
                    warn!("Failed to read request body: {}", e);
                    return text_response(StatusCode::BAD_REQUEST, "Bad request");
                }
            };

            match self.dispatch(&req).await {
                Ok(response) => {
                    self.record_request("success", &timer);
                    response
                }
                Err(err) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_unavailable(err.reason());
                    }
                    self.record_request("unavailable", &timer);
                    err.into()
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Runs the retry/failover state machine for one buffered request.
    pub async fn dispatch(&self, req: &ForwardRequest) -> Result<Response<Body>, DispatchError> {
        let mut ctx = AttemptContext::new();

        loop {
            if !self.strategy.admits(&ctx) {
                warn!(
                    failovers = ctx.failovers(),
                    "Max attempts reached, terminating"
                );
                return Err(DispatchError::AttemptsExhausted {
                    failovers: ctx.failovers(),
                });
            }

            let peer = match self.pool.select_peer().await {
                Some(peer) => peer,
                None => {
                    warn!(
                        failovers = ctx.failovers(),
                        "No live backend available, terminating"
                    );
                    return Err(DispatchError::NoPeerAvailable);
                }
            };

            debug!("Sending request to {}", peer.url);
            if let Some(response) = self.forward_with_retries(&peer, req, &mut ctx).await {
                return Ok(response);
            }

            if let Some(metrics) = &self.metrics {
                metrics.record_failover();
            }
            info!(
                backend = %peer.id,
                failovers = ctx.failovers(),
                "Failing over to another backend"
            );
        }
    }

    /// Forwards to `peer`, retrying it while the strategy allows. Returns
    /// `None` once the request has to move to another backend.
    async fn forward_with_retries(
        &self,
        peer: &Backend,
        req: &ForwardRequest,
        ctx: &mut AttemptContext,
    ) -> Option<Response<Body>> {
        loop {
            let timer = Timer::new();
            let result = peer.forward(req).await;
            if let Some(metrics) = &self.metrics {
                metrics.record_forward(&peer.id, result.is_ok(), timer.elapsed());
            }

            let err = match result {
                Ok(response) => return Some(response),
                Err(err) => err,
            };

            warn!(
                backend = %peer.id,
                retry = ctx.retries(),
                "Forwarding failed: {}",
                err
            );

            // Any transport error takes the backend out of rotation, even if
            // a retry below succeeds. Only the health checker brings it back.
            if peer.set_alive(false).await {
                warn!(backend = %peer.id, "Backend marked dead");
                if let Some(metrics) = &self.metrics {
                    metrics.update_backend_alive(&peer.id, false);
                    let alive = self.pool.alive_count().await;
                    metrics.update_backend_counts(alive, self.pool.len());
                }
            }

            match self.strategy.on_transport_error(ctx) {
                Transition::Retry { backoff } => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_retry(&peer.id);
                    }
                    sleep(backoff).await;
                }
                Transition::Failover => return None,
            }
        }
    }

    fn record_request(&self, outcome: &str, timer: &Timer) {
        if let Some(metrics) = &self.metrics {
            metrics.record_request(outcome, timer.elapsed());
        }
    }
}
