//
// src/proxy/mod.rs
//
mod backend;
mod forward;
mod pool;

pub use backend::{Backend, BackendStatus, DEFAULT_PROBE_TIMEOUT};
pub use forward::{BodyError, ForwardError, ForwardRequest, Forwarder, HttpForwarder};
pub use pool::{BackendPool, PoolError};

#[cfg(test)]
pub(crate) use backend::tests::closed_port;
