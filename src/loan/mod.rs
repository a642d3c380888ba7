//! Loan lifecycle module
//!
//! State machine, repayment ledger and post-completion ratings for
//! peer-to-peer micro-loans.

pub mod finalizer;
pub mod ledger;
pub mod lifecycle;
mod model;
pub(crate) mod service;
pub mod sweeper;

pub use finalizer::{RateLoanRequest, Rating};
pub use ledger::{
    BalanceSummary, Ledger, PaymentMethod, RecordRepaymentRequest, RepaymentEntry,
    RepaymentReceipt,
};
pub use lifecycle::{Initiator, LoanEvent, Party};
pub use model::*;
pub use service::{LendingPolicy, LoanEngine, SweepSummary};
