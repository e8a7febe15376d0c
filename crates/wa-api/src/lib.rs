//! wa-api: HTTP API for wa-gateway
//!
//! Lets operators start and stop tenant sessions and fetch the pairing code
//! a tenant has to scan, either once or as a Server-Sent Events stream.

pub mod error;
pub mod handlers;
pub mod qr_cache;
pub mod routes;
pub mod server;

pub use error::{ApiError, Result};
pub use qr_cache::QrCache;
pub use server::{AppState, app, start_server};
