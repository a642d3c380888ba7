//! Post-completion ratings

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

use super::model::{LoanRequest, LoanStatus};
use crate::error::LendingError;

/// One party's rating of the other after a loan completes
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct Rating {
    pub id: Uuid,
    pub loan_request_id: Uuid,
    pub rater_id: Uuid,
    pub ratee_id: Uuid,
    pub score: i16,
    pub review: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Request to rate the counterparty of a completed loan
#[derive(Debug, Deserialize, Validate, Clone)]
pub struct RateLoanRequest {
    #[serde(alias = "rating")]
    #[validate(range(min = 1, max = 5))]
    pub score: i16,
    #[validate(length(max = 1000))]
    pub review: Option<String>,
}

/// Build the rating `rater_id` may leave on `loan`, enforcing the rating window:
/// the loan must be completed, the rater must be a party, and each party rates
/// at most once.
pub fn prepare_rating(
    loan: &LoanRequest,
    existing: &[Rating],
    rater_id: Uuid,
    request: &RateLoanRequest,
    now: DateTime<Utc>,
) -> Result<Rating, LendingError> {
    request.validate()?;

    if loan.status != LoanStatus::Completed {
        return Err(LendingError::invalid_state(loan.status, "rate a loan"));
    }

    let ratee_id = loan
        .counterparty_of(rater_id)
        .ok_or_else(|| LendingError::Forbidden("only the borrower or lender can rate this loan".into()))?;

    if existing.iter().any(|rating| rating.rater_id == rater_id) {
        return Err(LendingError::AlreadyRated {
            loan_id: loan.id,
            rater_id,
        });
    }

    Ok(Rating {
        id: Uuid::new_v4(),
        loan_request_id: loan.id,
        rater_id,
        ratee_id,
        score: request.score,
        review: request
            .review
            .as_ref()
            .map(|review| review.trim().to_string())
            .filter(|review| !review.is_empty()),
        created_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loan::CreateLoanRequest;
    use rust_decimal_macros::dec;

    fn completed_loan() -> LoanRequest {
        let request = CreateLoanRequest {
            amount: dec!(2000),
            purpose: "School fees".to_string(),
            duration_days: 60,
            interest_rate: None,
        };
        let mut loan = LoanRequest::new(Uuid::new_v4(), &request, Utc::now());
        loan.lender_id = Some(Uuid::new_v4());
        loan.status = LoanStatus::Completed;
        loan
    }

    fn rate(score: i16) -> RateLoanRequest {
        RateLoanRequest {
            score,
            review: Some("  Paid on time ".to_string()),
        }
    }

    #[test]
    fn test_borrower_rates_lender() {
        let loan = completed_loan();
        let rating = prepare_rating(&loan, &[], loan.borrower_id, &rate(5), Utc::now()).unwrap();
        assert_eq!(Some(rating.ratee_id), loan.lender_id);
        assert_eq!(rating.review.as_deref(), Some("Paid on time"));
    }

    #[test]
    fn test_second_rating_rejected() {
        let loan = completed_loan();
        let first = prepare_rating(&loan, &[], loan.borrower_id, &rate(4), Utc::now()).unwrap();
        let err = prepare_rating(&loan, &[first], loan.borrower_id, &rate(2), Utc::now())
            .unwrap_err();
        assert!(matches!(err, LendingError::AlreadyRated { .. }));
    }

    #[test]
    fn test_lender_may_rate_after_borrower() {
        let loan = completed_loan();
        let first = prepare_rating(&loan, &[], loan.borrower_id, &rate(4), Utc::now()).unwrap();
        let lender = loan.lender_id.unwrap();
        assert!(prepare_rating(&loan, &[first], lender, &rate(5), Utc::now()).is_ok());
    }

    #[test]
    fn test_rating_requires_completion() {
        let mut loan = completed_loan();
        loan.status = LoanStatus::InProgress;
        let err = prepare_rating(&loan, &[], loan.borrower_id, &rate(3), Utc::now()).unwrap_err();
        assert!(matches!(err, LendingError::InvalidState { .. }));
    }

    #[test]
    fn test_score_range_and_outsiders() {
        let loan = completed_loan();
        assert!(matches!(
            prepare_rating(&loan, &[], loan.borrower_id, &rate(6), Utc::now()),
            Err(LendingError::Validation(_))
        ));
        assert!(matches!(
            prepare_rating(&loan, &[], Uuid::new_v4(), &rate(3), Utc::now()),
            Err(LendingError::Forbidden(_))
        ));
    }
}
