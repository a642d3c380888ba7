//! Loan state machine
//!
//! `TRANSITIONS` is the only place legal status changes are defined. Every
//! caller (interactive handlers, dispute resolution, the overdue sweep) goes
//! through [`next_status`]; anything not listed is an `IllegalTransition`.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::model::{LoanRequest, LoanStatus};
use crate::error::LendingError;

/// Something that asks a loan to change status
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LoanEvent {
    Accept,
    Cancel,
    Reject,
    Fulfill,
    RecordRepayment,
    FullyRepaid,
    OverdueDefault,
    AdminDefault,
    DisputeOpened,
    DisputeContinued,
    DisputeDefaulted,
    DisputeCancelled,
}

impl LoanEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanEvent::Accept => "accept",
            LoanEvent::Cancel => "cancel",
            LoanEvent::Reject => "reject",
            LoanEvent::Fulfill => "fulfill",
            LoanEvent::RecordRepayment => "record a repayment on",
            LoanEvent::FullyRepaid => "complete",
            LoanEvent::OverdueDefault => "default (overdue)",
            LoanEvent::AdminDefault => "default",
            LoanEvent::DisputeOpened => "open a dispute on",
            LoanEvent::DisputeContinued => "resume",
            LoanEvent::DisputeDefaulted => "default (dispute ruling)",
            LoanEvent::DisputeCancelled => "cancel (dispute ruling)",
        }
    }

    /// Outcomes an administrator may apply to a frozen loan
    pub fn is_dispute_resolution(&self) -> bool {
        matches!(
            self,
            LoanEvent::DisputeContinued | LoanEvent::DisputeDefaulted | LoanEvent::DisputeCancelled
        )
    }
}

impl fmt::Display for LoanEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is entitled to fire an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Borrower,
    Lender,
    Admin,
    System,
}

/// Concrete initiator of a transition, carried into lifecycle events
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "kind", content = "user_id", rename_all = "snake_case")]
pub enum Initiator {
    Borrower(Uuid),
    Lender(Uuid),
    Admin(Uuid),
    System,
}

impl Initiator {
    pub fn party(&self) -> Party {
        match self {
            Initiator::Borrower(_) => Party::Borrower,
            Initiator::Lender(_) => Party::Lender,
            Initiator::Admin(_) => Party::Admin,
            Initiator::System => Party::System,
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Initiator::Borrower(id) | Initiator::Lender(id) | Initiator::Admin(id) => Some(*id),
            Initiator::System => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Initiator::Borrower(_) => "borrower",
            Initiator::Lender(_) => "lender",
            Initiator::Admin(_) => "admin",
            Initiator::System => "system",
        }
    }

    pub fn from_parts(kind: &str, user_id: Option<Uuid>) -> Option<Self> {
        match (kind, user_id) {
            ("borrower", Some(id)) => Some(Initiator::Borrower(id)),
            ("lender", Some(id)) => Some(Initiator::Lender(id)),
            ("admin", Some(id)) => Some(Initiator::Admin(id)),
            ("system", _) => Some(Initiator::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    To(LoanStatus),
    /// Back to the in-flow status recorded when the dispute froze the loan
    Resume,
}

struct Transition {
    from: LoanStatus,
    event: LoanEvent,
    party: Party,
    to: Target,
}

const fn rule(from: LoanStatus, event: LoanEvent, party: Party, to: Target) -> Transition {
    Transition {
        from,
        event,
        party,
        to,
    }
}

use LoanEvent as E;
use LoanStatus as S;

const TRANSITIONS: &[Transition] = &[
    rule(S::Pending, E::Accept, Party::Lender, Target::To(S::Accepted)),
    rule(S::Pending, E::Cancel, Party::Borrower, Target::To(S::Cancelled)),
    rule(S::Pending, E::Reject, Party::Admin, Target::To(S::Rejected)),
    rule(S::Accepted, E::Fulfill, Party::Lender, Target::To(S::Fulfilled)),
    rule(S::Fulfilled, E::RecordRepayment, Party::Lender, Target::To(S::InProgress)),
    rule(S::InProgress, E::FullyRepaid, Party::System, Target::To(S::Completed)),
    rule(S::InProgress, E::OverdueDefault, Party::System, Target::To(S::Defaulted)),
    rule(S::InProgress, E::AdminDefault, Party::Admin, Target::To(S::Defaulted)),
    rule(S::Accepted, E::DisputeOpened, Party::System, Target::To(S::Disputed)),
    rule(S::Fulfilled, E::DisputeOpened, Party::System, Target::To(S::Disputed)),
    rule(S::InProgress, E::DisputeOpened, Party::System, Target::To(S::Disputed)),
    rule(S::Disputed, E::DisputeContinued, Party::System, Target::Resume),
    rule(S::Disputed, E::DisputeDefaulted, Party::Admin, Target::To(S::Defaulted)),
    rule(S::Disputed, E::DisputeCancelled, Party::Admin, Target::To(S::Cancelled)),
];

/// The party a given event belongs to, from any state that allows it
pub fn party_for(event: LoanEvent) -> Option<Party> {
    TRANSITIONS
        .iter()
        .find(|rule| rule.event == event)
        .map(|rule| rule.party)
}

/// Whether `event` is legal from `status` at all
pub fn is_allowed(status: LoanStatus, event: LoanEvent) -> bool {
    TRANSITIONS
        .iter()
        .any(|rule| rule.from == status && rule.event == event)
}

/// Resolve the status `loan` moves to when `initiator` fires `event`.
///
/// Fails with `IllegalTransition` when the table has no row for the current
/// status, and with `Forbidden` when the row exists but belongs to another
/// party.
pub fn next_status(
    loan: &LoanRequest,
    event: LoanEvent,
    initiator: Initiator,
) -> Result<LoanStatus, LendingError> {
    let rule = TRANSITIONS
        .iter()
        .find(|rule| rule.from == loan.status && rule.event == event)
        .ok_or(LendingError::IllegalTransition {
            current: loan.status,
            event,
        })?;

    if rule.party != initiator.party() {
        return Err(LendingError::Forbidden(format!(
            "only the {:?} may {} a loan",
            rule.party, event
        )));
    }

    match rule.to {
        Target::To(status) => Ok(status),
        Target::Resume => loan
            .pre_dispute_status
            .filter(|status| is_allowed(*status, E::DisputeOpened))
            .ok_or_else(|| {
                LendingError::Storage(format!(
                    "disputed loan {} has no resumable status recorded",
                    loan.id
                ))
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loan::CreateLoanRequest;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn loan_in(status: LoanStatus) -> LoanRequest {
        let request = CreateLoanRequest {
            amount: dec!(1000),
            purpose: "Stock for shop".to_string(),
            duration_days: 30,
            interest_rate: None,
        };
        let mut loan = LoanRequest::new(Uuid::new_v4(), &request, Utc::now());
        loan.status = status;
        if status.requires_lender() {
            loan.lender_id = Some(Uuid::new_v4());
        }
        loan
    }

    const ALL_STATUSES: [LoanStatus; 9] = [
        S::Pending,
        S::Accepted,
        S::Rejected,
        S::Fulfilled,
        S::InProgress,
        S::Completed,
        S::Defaulted,
        S::Disputed,
        S::Cancelled,
    ];

    #[test]
    fn test_happy_path() {
        let lender = Initiator::Lender(Uuid::new_v4());
        let mut loan = loan_in(S::Pending);
        for (event, initiator, expected) in [
            (E::Accept, lender, S::Accepted),
            (E::Fulfill, lender, S::Fulfilled),
            (E::RecordRepayment, lender, S::InProgress),
            (E::FullyRepaid, Initiator::System, S::Completed),
        ] {
            loan.status = next_status(&loan, event, initiator).unwrap();
            assert_eq!(loan.status, expected);
        }
    }

    #[test]
    fn test_pending_cannot_skip_to_in_progress() {
        let loan = loan_in(S::Pending);
        let err = next_status(&loan, E::RecordRepayment, Initiator::Lender(Uuid::new_v4()))
            .unwrap_err();
        assert_eq!(
            err,
            LendingError::IllegalTransition {
                current: S::Pending,
                event: E::RecordRepayment,
            }
        );
        assert!(next_status(&loan, E::FullyRepaid, Initiator::System).is_err());
        assert!(next_status(&loan, E::Fulfill, Initiator::Lender(Uuid::new_v4())).is_err());
    }

    #[test]
    fn test_cancel_only_from_pending() {
        let borrower = Initiator::Borrower(Uuid::new_v4());
        assert_eq!(
            next_status(&loan_in(S::Pending), E::Cancel, borrower).unwrap(),
            S::Cancelled
        );
        assert!(matches!(
            next_status(&loan_in(S::Accepted), E::Cancel, borrower),
            Err(LendingError::IllegalTransition {
                current: S::Accepted,
                event: E::Cancel
            })
        ));
    }

    #[test]
    fn test_wrong_party_is_forbidden() {
        let loan = loan_in(S::Pending);
        assert!(matches!(
            next_status(&loan, E::Accept, Initiator::Borrower(loan.borrower_id)),
            Err(LendingError::Forbidden(_))
        ));
        assert!(matches!(
            next_status(&loan, E::Reject, Initiator::Lender(Uuid::new_v4())),
            Err(LendingError::Forbidden(_))
        ));
    }

    #[test]
    fn test_terminal_states_are_closed() {
        let events = [
            E::Accept,
            E::Cancel,
            E::Reject,
            E::Fulfill,
            E::RecordRepayment,
            E::FullyRepaid,
            E::OverdueDefault,
            E::AdminDefault,
            E::DisputeOpened,
            E::DisputeContinued,
            E::DisputeDefaulted,
            E::DisputeCancelled,
        ];
        for status in ALL_STATUSES.iter().filter(|s| s.is_terminal()) {
            for event in events {
                assert!(
                    !is_allowed(*status, event),
                    "{} must not allow {}",
                    status,
                    event
                );
            }
        }
    }

    #[test]
    fn test_dispute_resume_restores_prior_state() {
        let mut loan = loan_in(S::Disputed);
        loan.pre_dispute_status = Some(S::Fulfilled);
        assert_eq!(
            next_status(&loan, E::DisputeContinued, Initiator::System).unwrap(),
            S::Fulfilled
        );

        loan.pre_dispute_status = None;
        assert!(matches!(
            next_status(&loan, E::DisputeContinued, Initiator::System),
            Err(LendingError::Storage(_))
        ));
    }

    #[test]
    fn test_dispute_opens_only_in_flow() {
        for status in ALL_STATUSES {
            let expected = matches!(status, S::Accepted | S::Fulfilled | S::InProgress);
            assert_eq!(is_allowed(status, E::DisputeOpened), expected, "{}", status);
        }
    }

    #[test]
    fn test_party_for_events() {
        assert_eq!(party_for(E::Accept), Some(Party::Lender));
        assert_eq!(party_for(E::Cancel), Some(Party::Borrower));
        assert_eq!(party_for(E::OverdueDefault), Some(Party::System));
        assert_eq!(party_for(E::DisputeDefaulted), Some(Party::Admin));
    }
}
