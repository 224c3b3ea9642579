//
// src/proxy/pool.rs
//

use super::backend::{Backend, BackendStatus};
use super::forward::Forwarder;
use crate::config::BackendConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("backend pool must contain at least one backend")]
    Empty,
}

/// Fixed, ordered set of backends plus the shared rotation cursor.
///
/// The backend list never changes after construction, so it is read
/// without locking. The cursor is only touched through atomics.
#[derive(Debug)]
pub struct BackendPool {
    backends: Vec<Arc<Backend>>,
    current: AtomicU64,
}

impl BackendPool {
    pub fn new(
        configs: &[BackendConfig],
        forwarder: Arc<dyn Forwarder>,
        probe_timeout: Duration,
    ) -> Result<Self, PoolError> {
        let backends = configs
            .iter()
            .map(|config| {
                Arc::new(Backend::new(
                    config.url.clone(),
                    forwarder.clone(),
                    probe_timeout,
                ))
            })
            .collect();

        Self::from_backends(backends)
    }

    pub fn from_backends(backends: Vec<Arc<Backend>>) -> Result<Self, PoolError> {
        if backends.is_empty() {
            return Err(PoolError::Empty);
        }

        for backend in &backends {
            tracing::info!("Registered backend: {}", backend.url);
        }

        Ok(Self {
            backends,
            current: AtomicU64::new(0),
        })
    }

    /// Advances the cursor and returns the new rotation position.
    pub fn next_index(&self) -> usize {
        let next = self.current.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        (next % self.backends.len() as u64) as usize
    }

    /// Next live backend in rotation order, or `None` when every backend is
    /// down. Never blocks on anything but the per-backend read locks.
    pub async fn select_peer(&self) -> Option<Arc<Backend>> {
        let len = self.backends.len();
        let next = self.next_index();

        for i in next..next + len {
            let idx = i % len;
            let backend = &self.backends[idx];

            if backend.is_alive().await {
                if i != next {
                    // Racy by intent: concurrent stores only shift fairness.
                    self.current.store(idx as u64, Ordering::SeqCst);
                }
                return Some(backend.clone());
            }
        }

        None
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Sets liveness of the backend at `url`. Returns `false` if no backend
    /// has that address.
    pub async fn mark_backend_status(&self, url: &Url, alive: bool) -> bool {
        match self.backends.iter().find(|b| &b.url == url) {
            Some(backend) => {
                backend.set_alive(alive).await;
                tracing::info!("({}) backend status set to {}", backend.url, alive);
                true
            }
            None => false,
        }
    }

    pub async fn alive_count(&self) -> usize {
        let mut alive = 0;
        for backend in &self.backends {
            if backend.is_alive().await {
                alive += 1;
            }
        }
        alive
    }

    pub async fn snapshot(&self) -> Vec<BackendStatus> {
        let mut statuses = Vec::with_capacity(self.backends.len());
        for backend in &self.backends {
            statuses.push(backend.status().await);
        }
        statuses
    }
}
