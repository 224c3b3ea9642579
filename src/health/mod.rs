// src/health/mod.rs
mod checker;

pub use checker::{HealthChecker, HealthReport};
