//! Authentication service
//!
//! Registration, login and sessions belong to the identity collaborator. This
//! service only verifies the bearer tokens it signs and can issue tokens for
//! tooling and tests.

use uuid::Uuid;

use super::jwt::{generate_access_token, identity_from_claims, verify_token, JwtError, ACCESS_TOKEN_TYPE};
use crate::models::{Actor, UserRole};

/// Bearer token verification
#[derive(Clone)]
pub struct AuthService {
    jwt_secret: String,
    access_token_ttl_seconds: i64,
}

impl AuthService {
    pub fn new(jwt_secret: String, access_token_ttl_seconds: i64) -> Self {
        Self {
            jwt_secret,
            access_token_ttl_seconds,
        }
    }

    /// Sign an access token for `user_id` acting as `role`
    pub fn issue_token(&self, user_id: Uuid, role: UserRole) -> Result<String, JwtError> {
        generate_access_token(user_id, role, &self.jwt_secret, self.access_token_ttl_seconds)
    }

    /// Verify an access token and resolve the caller
    pub fn authenticate(&self, token: &str) -> Result<Actor, JwtError> {
        let claims = verify_token(token, &self.jwt_secret)?;
        if claims.token_type != ACCESS_TOKEN_TYPE {
            return Err(JwtError::InvalidToken("expected an access token".to_string()));
        }
        let (user_id, role) = identity_from_claims(&claims)?;
        Ok(Actor::new(user_id, role))
    }

    pub fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_seconds
    }
}
