// src/retry/attempt.rs

/// Per-request attempt counters. Owned by a single dispatch and never shared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptContext {
    retries: u32,
    failovers: u32,
}

impl AttemptContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retries already spent on the current backend.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Backend switches performed so far.
    pub fn failovers(&self) -> u32 {
        self.failovers
    }

    pub(crate) fn record_retry(&mut self) {
        self.retries += 1;
    }

    pub(crate) fn record_failover(&mut self) {
        self.retries = 0;
        self.failovers += 1;
    }
}
