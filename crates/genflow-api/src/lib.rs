//! Axum HTTP/WS API server.
//!
//! This crate provides:
//! - Job management API over the registry and coalescer
//! - Provider webhook intake
//! - Authenticated websocket notifications
//! - Rate limiting and security headers
//! - Prometheus metrics

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;
pub mod ws;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use services::{SubmitError, SubmitReceipt, SubmitService};
pub use state::AppState;
