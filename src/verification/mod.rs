//! Verification Gate
//!
//! Identity verification and blocking are owned by the user-management
//! collaborator. The engine only reads a user's status through
//! [`VerificationGate`] before creating or accepting loans; administrators
//! write it through [`UserDirectory`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::LendingError;

/// Outcome of a user's identity verification
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "verification_state", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum VerificationState {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for VerificationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VerificationState::Pending => "pending",
            VerificationState::Approved => "approved",
            VerificationState::Rejected => "rejected",
        })
    }
}

/// Verification status of one user
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, Copy, PartialEq, Eq)]
pub struct VerificationStatus {
    pub user_id: Uuid,
    pub state: VerificationState,
    pub blocked: bool,
}

/// Actions that require an eligible user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatedAction {
    CreateLoan,
    AcceptLoan,
}

/// Gate decision with the reason for a denial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    Blocked,
    NotVerified(VerificationState),
}

impl Eligibility {
    /// Blocking wins over verification state
    pub fn from_status(status: &VerificationStatus) -> Self {
        if status.blocked {
            Eligibility::Blocked
        } else if status.state != VerificationState::Approved {
            Eligibility::NotVerified(status.state)
        } else {
            Eligibility::Eligible
        }
    }

    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }

    pub fn reason(&self) -> Option<&'static str> {
        match self {
            Eligibility::Eligible => None,
            Eligibility::Blocked => Some("user is blocked"),
            Eligibility::NotVerified(_) => Some("user verification is not approved"),
        }
    }

    pub fn into_result(self, user_id: Uuid) -> Result<(), LendingError> {
        match self {
            Eligibility::Eligible => Ok(()),
            Eligibility::Blocked => Err(LendingError::UserBlocked(user_id)),
            Eligibility::NotVerified(state) => Err(LendingError::NotVerified { user_id, state }),
        }
    }
}

/// Read side of the verification collaborator
#[async_trait]
pub trait VerificationGate: Send + Sync {
    /// `None` when the user is unknown
    async fn verification_status(
        &self,
        user_id: Uuid,
    ) -> Result<Option<VerificationStatus>, LendingError>;

    /// Eligibility of `user_id` for `action`
    async fn is_eligible(
        &self,
        user_id: Uuid,
        action: GatedAction,
    ) -> Result<Eligibility, LendingError> {
        let status = self
            .verification_status(user_id)
            .await?
            .ok_or_else(|| LendingError::not_found("user", user_id))?;
        let eligibility = Eligibility::from_status(&status);
        if let Some(reason) = eligibility.reason() {
            tracing::debug!(user_id = %user_id, action = ?action, reason, "Verification gate denied action");
        }
        Ok(eligibility)
    }
}

/// Administrative overrides on the verification collaborator
#[async_trait]
pub trait UserDirectory: VerificationGate {
    async fn set_verification(
        &self,
        user_id: Uuid,
        state: VerificationState,
    ) -> Result<VerificationStatus, LendingError>;

    async fn set_blocked(
        &self,
        user_id: Uuid,
        blocked: bool,
    ) -> Result<VerificationStatus, LendingError>;
}

/// Admin request to change a user's verification
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct SetVerificationRequest {
    pub status: VerificationState,
}

/// Admin request to block or unblock a user
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct SetBlockedRequest {
    pub blocked: bool,
}
