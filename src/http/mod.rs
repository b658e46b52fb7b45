//! HTTP server module
//!
//! This module handles HTTP request routing and handling:
//! - Axum router with the job endpoints
//! - Request handlers for submission, status, artifacts and cancellation
//! - Error to status code mapping
//! - CORS and request tracing middleware

pub mod handlers;
pub mod routes;

pub use routes::create_router;
