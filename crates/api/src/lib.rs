// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! LaunchKit API Library
//!
//! HTTP surface over the billing core: the gateway webhook, the pricing
//! table and health checks.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::{Config, ConfigError};
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
