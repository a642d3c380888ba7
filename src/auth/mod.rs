//! Authentication module
//!
//! Bearer-token (JWT) verification for the lending API.

mod jwt;
mod service;

pub use jwt::{generate_access_token, verify_token, Claims, JwtError};
pub use service::AuthService;
