//! Dispute and report models

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::models::PaginationParams;

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "dispute_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DisputeType {
    PaymentNotReceived,
    WrongAmount,
    UnauthorizedCharge,
    TermsViolation,
    Other,
}

/// Dispute status: open -> under_review -> resolved | closed
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "dispute_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Open,
    UnderReview,
    Resolved,
    Closed,
}

impl DisputeStatus {
    /// Open and under-review disputes both freeze their loan
    pub fn is_open(&self) -> bool {
        matches!(self, DisputeStatus::Open | DisputeStatus::UnderReview)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeStatus::Open => "open",
            DisputeStatus::UnderReview => "under_review",
            DisputeStatus::Resolved => "resolved",
            DisputeStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the resolution of a dispute means for its loan
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Default)]
#[sqlx(type_name = "dispute_outcome", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DisputeOutcome {
    /// The loan resumes where it was frozen
    #[default]
    Continue,
    Default,
    Cancel,
}

/// One entry in a dispute's discussion thread
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct DisputeNote {
    pub id: Uuid,
    pub dispute_id: Uuid,
    pub author_id: Uuid,
    pub text: String,
    /// Reference to uploaded evidence held by the file collaborator
    pub evidence: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Dispute raised by one loan party against the other
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct Dispute {
    pub id: Uuid,
    pub loan_request_id: Uuid,
    pub raised_by: Uuid,
    pub against_user_id: Uuid,
    pub dispute_type: DisputeType,
    pub description: String,
    pub disputed_amount: Option<Decimal>,
    pub status: DisputeStatus,
    pub resolution: Option<String>,
    pub outcome: Option<DisputeOutcome>,
    pub resolved_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    pub notes: Vec<DisputeNote>,
}

impl Dispute {
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.raised_by == user_id || self.against_user_id == user_id
    }
}

fn validate_positive_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount <= Decimal::ZERO {
        return Err(ValidationError::new("disputed_amount_positive"));
    }
    Ok(())
}

/// Request to raise a dispute
#[derive(Debug, Deserialize, Validate, Clone)]
pub struct FileDisputeRequest {
    pub loan_request_id: Uuid,
    pub against_user_id: Uuid,
    pub dispute_type: DisputeType,
    #[validate(length(min = 1, max = 2000))]
    pub description: String,
    #[validate(custom = "validate_positive_amount")]
    pub disputed_amount: Option<Decimal>,
}

/// Request to add a note to an open dispute
#[derive(Debug, Deserialize, Validate, Clone)]
pub struct AddDisputeNoteRequest {
    #[serde(alias = "note")]
    #[validate(length(min = 1, max = 2000))]
    pub text: String,
    #[validate(length(max = 500))]
    pub evidence: Option<String>,
}

/// Admin request to review or settle a dispute
#[derive(Debug, Deserialize, Validate, Clone)]
pub struct ResolveDisputeRequest {
    pub status: DisputeStatus,
    #[validate(length(max = 2000))]
    pub resolution: Option<String>,
    #[serde(default)]
    pub outcome: DisputeOutcome,
}

/// Dispute listing filter
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DisputeFilter {
    pub status: Option<DisputeStatus>,
    pub loan_request_id: Option<Uuid>,
    /// Restrict to disputes raised by or against this user
    #[serde(skip)]
    pub involving: Option<Uuid>,
}

impl DisputeFilter {
    pub fn matches(&self, dispute: &Dispute) -> bool {
        self.status.map_or(true, |status| dispute.status == status)
            && self
                .loan_request_id
                .map_or(true, |id| dispute.loan_request_id == id)
            && self.involving.map_or(true, |id| dispute.involves(id))
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "report_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    Fraud,
    Harassment,
    NonPayment,
    FalseInformation,
    InappropriateBehavior,
    Other,
}

/// Report status: pending -> under_review -> resolved | dismissed
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "report_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    UnderReview,
    Resolved,
    Dismissed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::UnderReview => "under_review",
            ReportStatus::Resolved => "resolved",
            ReportStatus::Dismissed => "dismissed",
        }
    }

    pub fn can_move_to(&self, next: ReportStatus) -> bool {
        use ReportStatus::*;
        matches!(
            (self, next),
            (Pending, UnderReview)
                | (Pending, Resolved)
                | (Pending, Dismissed)
                | (UnderReview, Resolved)
                | (UnderReview, Dismissed)
        )
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Report about a user's conduct. Does not freeze any loan.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct Report {
    pub id: Uuid,
    pub reporter_id: Uuid,
    pub reported_user_id: Uuid,
    pub loan_request_id: Option<Uuid>,
    pub report_type: ReportType,
    pub description: String,
    pub status: ReportStatus,
    pub resolution: Option<String>,
    pub resolved_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to file a report
#[derive(Debug, Deserialize, Validate, Clone)]
pub struct FileReportRequest {
    pub reported_user_id: Uuid,
    pub loan_request_id: Option<Uuid>,
    pub report_type: ReportType,
    #[validate(length(min = 1, max = 2000))]
    pub description: String,
}

/// Admin request to move a report along
#[derive(Debug, Deserialize, Validate, Clone)]
pub struct UpdateReportRequest {
    pub status: ReportStatus,
    #[validate(length(max = 2000))]
    pub resolution: Option<String>,
    /// Block the reported user when resolving
    #[serde(default)]
    pub block_user: bool,
}

/// Report listing filter
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ReportFilter {
    pub status: Option<ReportStatus>,
    #[serde(skip)]
    pub reporter_id: Option<Uuid>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl ReportFilter {
    pub fn pagination(&self) -> PaginationParams {
        PaginationParams {
            page: self.page,
            limit: self.limit,
        }
    }

    pub fn matches(&self, report: &Report) -> bool {
        self.status.map_or(true, |status| report.status == status)
            && self.reporter_id.map_or(true, |id| report.reporter_id == id)
    }
}
