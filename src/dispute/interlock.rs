//! Dispute interlock
//!
//! While any dispute against a loan is open, the loan is frozen: only the
//! administrative resolution events may move it. Reports never freeze a loan.

use uuid::Uuid;

use super::model::Dispute;
use crate::error::LendingError;
use crate::loan::{LoanEvent, LoanRequest, LoanStatus};

/// Disputes in `disputes` that still freeze their loan
pub fn open_disputes(disputes: &[Dispute]) -> impl Iterator<Item = &Dispute> {
    disputes.iter().filter(|dispute| dispute.status.is_open())
}

/// True when the loan is frozen, either by an open dispute or by its status
pub fn is_frozen(loan: &LoanRequest, disputes: &[Dispute]) -> bool {
    loan.status == LoanStatus::Disputed
        || open_disputes(disputes).any(|dispute| dispute.loan_request_id == loan.id)
}

/// Refuse `event` on a frozen loan unless it is a dispute resolution.
///
/// Opening a further dispute on an already-frozen loan is also allowed; it
/// does not move the loan.
pub fn ensure_unfrozen(
    loan: &LoanRequest,
    disputes: &[Dispute],
    event: LoanEvent,
) -> Result<(), LendingError> {
    if !is_frozen(loan, disputes) {
        return Ok(());
    }
    if event.is_dispute_resolution() || event == LoanEvent::DisputeOpened {
        return Ok(());
    }
    tracing::debug!(loan_id = %loan.id, event = %event, "Interlock refused action on disputed loan");
    Err(LendingError::LoanDisputed(loan.id))
}

/// Open disputes other than `except`
pub fn others_open(disputes: &[Dispute], except: Uuid) -> usize {
    open_disputes(disputes)
        .filter(|dispute| dispute.id != except)
        .count()
}
