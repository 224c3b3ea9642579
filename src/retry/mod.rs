// src/retry/mod.rs
mod attempt;
mod strategy;

pub use attempt::AttemptContext;
pub use strategy::{RetryStrategy, Transition};
