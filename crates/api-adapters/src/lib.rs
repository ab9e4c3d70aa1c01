//! medibook/crates/api-adapters/src/lib.rs
//!
//! Transport adapters. Error mapping and metrics are transport-agnostic;
//! the axum router is behind the `web-axum` feature.

pub mod error;
pub mod metrics;

#[cfg(feature = "web-axum")]
pub mod http;

pub use error::{status_code, ErrorBody};
pub use metrics::{MeteredRateLimit, Metrics};

#[cfg(feature = "web-axum")]
pub use error::ApiError;

#[cfg(feature = "web-axum")]
pub use http::{router, AppState};
