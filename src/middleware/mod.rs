//! Middleware for the lending API
//!
//! Request tracing and bearer-token authentication.

pub mod auth;
mod tracing;

pub use auth::{AdminUser, AuthenticatedUser};
pub use tracing::request_tracing;
