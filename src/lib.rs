pub mod cache;
pub mod config;
pub mod dns;
pub mod error;
pub mod metrics;
pub mod rate_limiter;
pub mod resolver;
pub mod server;
pub mod upstream;
pub mod validation;

pub use dns::{Answer, Query, QType, RCode};
