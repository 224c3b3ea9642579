// src/retry/strategy.rs

use super::attempt::AttemptContext;
use crate::config::RetryConfig;
use std::time::Duration;
use tracing::debug;

/// What to do after a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Wait `backoff`, then forward to the same backend again.
    Retry { backoff: Duration },
    /// Give up on this backend and select another one.
    Failover,
}

/// Bounds on same-backend retries and cross-backend failover.
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    max_retries: u32,
    backoff: Duration,
    max_failover_attempts: u32,
}

impl RetryStrategy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: config.backoff(),
            max_failover_attempts: config.max_failover_attempts,
        }
    }

    /// Whether a request may select another backend.
    pub fn admits(&self, ctx: &AttemptContext) -> bool {
        ctx.failovers() <= self.max_failover_attempts
    }

    /// Advances `ctx` past a transport error and picks the next step.
    pub fn on_transport_error(&self, ctx: &mut AttemptContext) -> Transition {
        if ctx.retries() < self.max_retries {
            ctx.record_retry();
            debug!(
                "Retry {}/{} in {:?}",
                ctx.retries(),
                self.max_retries,
                self.backoff
            );
            Transition::Retry {
                backoff: self.backoff,
            }
        } else {
            ctx.record_failover();
            debug!(
                "Retries exhausted, failover {}/{}",
                ctx.failovers(),
                self.max_failover_attempts
            );
            Transition::Failover
        }
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}
