//! Append-only repayment ledger
//!
//! Entries are never edited or removed; the outstanding balance is always
//! derived as `total_due - sum(entries)`. Writes that would drive the balance
//! below zero are rejected, so the derived balance can never go negative.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

use super::model::LoanStatus;
use crate::error::LendingError;

/// How the borrower paid the lender (attested, not processed)
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "payment_method", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    Upi,
    Cheque,
    Other,
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Upi => "upi",
            PaymentMethod::Cheque => "cheque",
            PaymentMethod::Other => "other",
        };
        f.write_str(name)
    }
}

/// A single recorded repayment. Immutable once written.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct RepaymentEntry {
    pub id: Uuid,
    pub loan_request_id: Uuid,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub transaction_reference: Option<String>,
    pub remarks: Option<String>,
    pub recorded_by: Uuid,
    pub recorded_at: DateTime<Utc>,
}

/// Request to record a repayment
#[derive(Debug, Deserialize, Validate, Clone)]
pub struct RecordRepaymentRequest {
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    #[validate(length(max = 120))]
    pub transaction_reference: Option<String>,
    #[validate(length(max = 1000))]
    pub remarks: Option<String>,
}

/// Result of a successful repayment
#[derive(Debug, Serialize, Clone)]
pub struct RepaymentReceipt {
    pub entry: RepaymentEntry,
    pub outstanding_balance: Decimal,
    pub status: LoanStatus,
}

/// Read model of a loan's repayment position
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct BalanceSummary {
    pub loan_id: Uuid,
    pub status: LoanStatus,
    pub principal: Decimal,
    pub interest_rate: Option<Decimal>,
    pub total_due: Decimal,
    pub total_repaid: Decimal,
    pub outstanding_balance: Decimal,
    pub entry_count: usize,
}

/// Principal plus flat interest, rounded to cents
pub fn total_due(principal: Decimal, rate_percent: Decimal) -> Decimal {
    let interest = (principal * rate_percent / Decimal::ONE_HUNDRED).round_dp(2);
    principal + interest
}

/// Balance view over one loan's entries
#[derive(Debug, Clone, Copy)]
pub struct Ledger<'a> {
    total_due: Decimal,
    entries: &'a [RepaymentEntry],
}

/// What a validated repayment would do to the balance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostingOutcome {
    pub remaining: Decimal,
    pub is_first: bool,
    pub fully_repaid: bool,
}

impl<'a> Ledger<'a> {
    pub fn new(total_due: Decimal, entries: &'a [RepaymentEntry]) -> Self {
        Self { total_due, entries }
    }

    pub fn total_due(&self) -> Decimal {
        self.total_due
    }

    pub fn total_repaid(&self) -> Decimal {
        self.entries.iter().map(|entry| entry.amount).sum()
    }

    pub fn outstanding(&self) -> Decimal {
        self.total_due - self.total_repaid()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check a prospective repayment against the current balance.
    ///
    /// Non-positive amounts and anything above the outstanding balance are
    /// refused; overpayments are never clamped.
    pub fn check(&self, amount: Decimal) -> Result<PostingOutcome, LendingError> {
        let outstanding = self.outstanding();
        if amount <= Decimal::ZERO || amount > outstanding || has_sub_cent(amount) {
            return Err(LendingError::InvalidAmount {
                amount,
                outstanding,
            });
        }
        let remaining = outstanding - amount;
        Ok(PostingOutcome {
            remaining,
            is_first: self.entries.is_empty(),
            fully_repaid: remaining.is_zero(),
        })
    }
}

/// Whether `amount` carries a non-zero digit past the cent
pub(crate) fn has_sub_cent(amount: Decimal) -> bool {
    amount.normalize().scale() > 2
}
