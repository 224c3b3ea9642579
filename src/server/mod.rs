pub mod builder;
pub mod handler;
pub mod listener;

pub use builder::{PerConnection, ServerBuilder};
pub use handler::RequestHandler;
