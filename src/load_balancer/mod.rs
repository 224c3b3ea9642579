// src/load_balancer/mod.rs
mod dispatcher;

pub use dispatcher::{Balancer, DispatchError, UNAVAILABLE_BODY};
pub(crate) use dispatcher::text_response;
