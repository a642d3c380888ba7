//! Loan request models

use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::ledger;
use crate::models::PaginationParams;

/// Smallest principal a borrower may request
pub const MIN_LOAN_AMOUNT: Decimal = Decimal::from_parts(500, 0, 0, false, 0);
/// Largest principal a borrower may request
pub const MAX_LOAN_AMOUNT: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);
pub const MIN_DURATION_DAYS: i32 = 7;
pub const MAX_DURATION_DAYS: i32 = 365;

/// Loan request status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "loan_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Pending,
    Accepted,
    Rejected,
    Fulfilled,
    InProgress,
    Completed,
    Defaulted,
    Disputed,
    Cancelled,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "pending",
            LoanStatus::Accepted => "accepted",
            LoanStatus::Rejected => "rejected",
            LoanStatus::Fulfilled => "fulfilled",
            LoanStatus::InProgress => "in_progress",
            LoanStatus::Completed => "completed",
            LoanStatus::Defaulted => "defaulted",
            LoanStatus::Disputed => "disputed",
            LoanStatus::Cancelled => "cancelled",
        }
    }

    /// No further lifecycle transition leaves these states
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoanStatus::Completed
                | LoanStatus::Rejected
                | LoanStatus::Cancelled
                | LoanStatus::Defaulted
        )
    }

    /// States in which a loan must carry a lender
    pub fn requires_lender(&self) -> bool {
        matches!(
            self,
            LoanStatus::Accepted
                | LoanStatus::Fulfilled
                | LoanStatus::InProgress
                | LoanStatus::Completed
                | LoanStatus::Defaulted
                | LoanStatus::Disputed
        )
    }

    /// States in which the ledger accepts new repayments
    pub fn accepts_repayments(&self) -> bool {
        matches!(self, LoanStatus::Fulfilled | LoanStatus::InProgress)
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loan request model
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct LoanRequest {
    pub id: Uuid,
    pub borrower_id: Uuid,
    pub lender_id: Option<Uuid>,
    pub amount: Decimal,
    pub purpose: String,
    pub duration_days: i32,
    /// Rate the borrower asked for, if any
    pub proposed_interest_rate: Option<Decimal>,
    /// Flat rate in percent, fixed at acceptance
    pub interest_rate: Option<Decimal>,
    pub status: LoanStatus,
    /// Where the loan returns when its disputes are settled in favor of continuation
    pub pre_dispute_status: Option<LoanStatus>,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub fulfilled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl LoanRequest {
    /// A fresh pending request
    pub fn new(borrower_id: Uuid, request: &CreateLoanRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            borrower_id,
            lender_id: None,
            amount: request.amount,
            purpose: request.purpose.trim().to_string(),
            duration_days: request.duration_days,
            proposed_interest_rate: request.interest_rate,
            interest_rate: None,
            status: LoanStatus::Pending,
            pre_dispute_status: None,
            created_at: now,
            accepted_at: None,
            fulfilled_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Principal plus flat interest; zero interest until a rate is fixed
    pub fn total_due(&self) -> Decimal {
        ledger::total_due(self.amount, self.interest_rate.unwrap_or(Decimal::ZERO))
    }

    /// Repayment deadline, counted from the day the money was handed over
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        self.fulfilled_at
            .map(|fulfilled| fulfilled + Duration::days(i64::from(self.duration_days)))
    }

    /// Past the due date plus the grace window
    pub fn is_overdue(&self, now: DateTime<Utc>, grace_days: i64) -> bool {
        self.due_at()
            .map(|due| now > due + Duration::days(grace_days))
            .unwrap_or(false)
    }

    /// The other side of the loan from `user_id`, if `user_id` is a party
    pub fn counterparty_of(&self, user_id: Uuid) -> Option<Uuid> {
        if user_id == self.borrower_id {
            self.lender_id
        } else if Some(user_id) == self.lender_id {
            Some(self.borrower_id)
        } else {
            None
        }
    }

    pub fn is_party(&self, user_id: Uuid) -> bool {
        user_id == self.borrower_id || Some(user_id) == self.lender_id
    }
}

pub(crate) fn validate_loan_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount < MIN_LOAN_AMOUNT || *amount > MAX_LOAN_AMOUNT {
        let mut err = ValidationError::new("amount_range");
        err.message = Some("amount must be between 500 and 1000000".into());
        return Err(err);
    }
    if ledger::has_sub_cent(*amount) {
        let mut err = ValidationError::new("amount_precision");
        err.message = Some("amount supports at most two decimal places".into());
        return Err(err);
    }
    Ok(())
}

pub(crate) fn validate_interest_rate(rate: &Decimal) -> Result<(), ValidationError> {
    if rate.is_sign_negative() || *rate > Decimal::ONE_HUNDRED {
        let mut err = ValidationError::new("interest_rate_range");
        err.message = Some("interest rate must be between 0 and 100 percent".into());
        return Err(err);
    }
    if ledger::has_sub_cent(*rate) {
        let mut err = ValidationError::new("interest_rate_precision");
        err.message = Some("interest rate supports at most two decimal places".into());
        return Err(err);
    }
    Ok(())
}

/// Request to create a new loan request
#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateLoanRequest {
    #[validate(custom = "validate_loan_amount")]
    pub amount: Decimal,
    #[validate(length(min = 1, max = 500))]
    pub purpose: String,
    #[serde(alias = "duration")]
    #[validate(range(min = 7, max = 365))]
    pub duration_days: i32,
    #[validate(custom = "validate_interest_rate")]
    pub interest_rate: Option<Decimal>,
}

/// Edits a borrower may make while the request is still pending
#[derive(Debug, Deserialize, Validate, Clone, Default)]
pub struct UpdateLoanRequest {
    #[validate(custom = "validate_loan_amount")]
    pub amount: Option<Decimal>,
    #[validate(length(min = 1, max = 500))]
    pub purpose: Option<String>,
    #[serde(alias = "duration")]
    #[validate(range(min = 7, max = 365))]
    pub duration_days: Option<i32>,
    #[validate(custom = "validate_interest_rate")]
    pub interest_rate: Option<Decimal>,
}

/// Lender acceptance, optionally proposing a rate
#[derive(Debug, Deserialize, Validate, Clone, Default)]
pub struct AcceptLoanRequest {
    #[validate(custom = "validate_interest_rate")]
    pub interest_rate: Option<Decimal>,
}

/// Administrative rejection of a pending request
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RejectLoanRequest {
    pub reason: Option<String>,
}

/// Which side of the loan the caller is listing as
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoanRole {
    Borrower,
    Lender,
}

/// Query for listing loans
#[derive(Debug, Deserialize, Default)]
pub struct ListLoansQuery {
    pub status: Option<LoanStatus>,
    pub role: Option<LoanRole>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Storage-level loan filter
#[derive(Debug, Clone, Default)]
pub struct LoanFilter {
    pub borrower_id: Option<Uuid>,
    pub lender_id: Option<Uuid>,
    pub exclude_borrower_id: Option<Uuid>,
    pub status: Option<LoanStatus>,
    pub pagination: PaginationParams,
}

impl LoanFilter {
    pub fn matches(&self, loan: &LoanRequest) -> bool {
        self.borrower_id.map_or(true, |id| loan.borrower_id == id)
            && self.lender_id.map_or(true, |id| loan.lender_id == Some(id))
            && self
                .exclude_borrower_id
                .map_or(true, |id| loan.borrower_id != id)
            && self.status.map_or(true, |status| loan.status == status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn create_request() -> CreateLoanRequest {
        CreateLoanRequest {
            amount: dec!(10000),
            purpose: "Sewing machine".to_string(),
            duration_days: 30,
            interest_rate: None,
        }
    }

    #[test]
    fn test_create_request_validation() {
        assert!(create_request().validate().is_ok());

        let mut request = create_request();
        request.amount = dec!(499.99);
        assert!(request.validate().is_err());

        request.amount = dec!(1000000.01);
        assert!(request.validate().is_err());

        request.amount = dec!(1000000);
        assert!(request.validate().is_ok());

        request.duration_days = 6;
        assert!(request.validate().is_err());

        request.duration_days = 365;
        request.interest_rate = Some(dec!(120));
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_amount_precision() {
        let mut request = create_request();
        request.amount = dec!(1000.005);
        assert!(request.validate().is_err());

        request.amount = dec!(500.000);
        assert!(request.validate().is_ok());

        request.interest_rate = Some(dec!(7.555));
        assert!(request.validate().is_err());

        request.interest_rate = Some(dec!(7.550));
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_lender_invariant_states() {
        assert!(!LoanStatus::Pending.requires_lender());
        assert!(!LoanStatus::Cancelled.requires_lender());
        assert!(!LoanStatus::Rejected.requires_lender());
        assert!(LoanStatus::Disputed.requires_lender());
        assert!(LoanStatus::Defaulted.requires_lender());
    }

    #[test]
    fn test_due_date_and_overdue() {
        let now = Utc::now();
        let mut loan = LoanRequest::new(Uuid::new_v4(), &create_request(), now);
        assert!(loan.due_at().is_none());
        assert!(!loan.is_overdue(now + Duration::days(400), 7));

        loan.fulfilled_at = Some(now);
        assert_eq!(loan.due_at(), Some(now + Duration::days(30)));
        assert!(!loan.is_overdue(now + Duration::days(37), 7));
        assert!(loan.is_overdue(now + Duration::days(38), 7));
    }

    #[test]
    fn test_counterparty() {
        let borrower = Uuid::new_v4();
        let lender = Uuid::new_v4();
        let mut loan = LoanRequest::new(borrower, &create_request(), Utc::now());
        assert_eq!(loan.counterparty_of(borrower), None);

        loan.lender_id = Some(lender);
        assert_eq!(loan.counterparty_of(borrower), Some(lender));
        assert_eq!(loan.counterparty_of(lender), Some(borrower));
        assert_eq!(loan.counterparty_of(Uuid::new_v4()), None);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&LoanStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }
}
