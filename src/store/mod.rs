//! Persistence for the lending engine
//!
//! Every mutation of a loan goes through a [`LoanUnit`]: an exclusive,
//! per-loan critical section opened by [`LoanStore::lock_loan`]. The unit
//! exposes the committed state it observed under the lock and applies a
//! [`LoanChanges`] batch atomically. Dropping a unit without committing
//! leaves storage untouched.

use async_trait::async_trait;
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::dispute::{Dispute, DisputeFilter, DisputeNote, Report, ReportFilter, ReportStatus};
use crate::error::LendingError;
use crate::events::LifecycleEvent;
use crate::loan::{LoanFilter, LoanRequest, Rating, RepaymentEntry};
use crate::models::PaginatedResponse;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Committed state of one loan, read under its lock
#[derive(Debug, Clone)]
pub struct LoanSnapshot {
    pub loan: LoanRequest,
    /// Ledger entries in recording order
    pub entries: Vec<RepaymentEntry>,
    /// Every dispute referencing the loan, open or not
    pub disputes: Vec<Dispute>,
    pub ratings: Vec<Rating>,
}

impl LoanSnapshot {
    pub fn dispute(&self, dispute_id: Uuid) -> Option<&Dispute> {
        self.disputes.iter().find(|dispute| dispute.id == dispute_id)
    }
}

/// Writes staged by one engine operation
#[derive(Debug, Clone, Default)]
pub struct LoanChanges {
    /// Replacement loan row
    pub loan: Option<LoanRequest>,
    /// Appended ledger entry; entries are never updated
    pub repayment: Option<RepaymentEntry>,
    /// Inserted or updated dispute (notes are not written through this field)
    pub dispute: Option<Dispute>,
    pub note: Option<DisputeNote>,
    pub rating: Option<Rating>,
    /// Audit rows, written with the rest of the batch
    pub events: Vec<LifecycleEvent>,
}

impl LoanChanges {
    pub fn is_empty(&self) -> bool {
        self.loan.is_none()
            && self.repayment.is_none()
            && self.dispute.is_none()
            && self.note.is_none()
            && self.rating.is_none()
            && self.events.is_empty()
    }
}

/// Exclusive hold on one loan
#[async_trait]
pub trait LoanUnit: Send {
    fn snapshot(&self) -> &LoanSnapshot;

    /// Apply `changes` atomically and release the lock
    async fn commit(self: Box<Self>, changes: LoanChanges) -> Result<(), LendingError>;
}

/// Storage backend for loans, ledgers, disputes and reports
#[async_trait]
pub trait LoanStore: Send + Sync {
    /// Insert a new loan together with its creation event
    async fn insert_loan(
        &self,
        loan: &LoanRequest,
        event: &LifecycleEvent,
    ) -> Result<(), LendingError>;

    /// Open the per-loan critical section. Fails with `NotFound` for unknown ids.
    async fn lock_loan(&self, loan_id: Uuid) -> Result<Box<dyn LoanUnit>, LendingError>;

    async fn get_loan(&self, loan_id: Uuid) -> Result<Option<LoanRequest>, LendingError>;

    /// Newest first
    async fn list_loans(
        &self,
        filter: &LoanFilter,
    ) -> Result<PaginatedResponse<LoanRequest>, LendingError>;

    /// Ledger entries in recording order
    async fn repayments(&self, loan_id: Uuid) -> Result<Vec<RepaymentEntry>, LendingError>;

    async fn ratings(&self, loan_id: Uuid) -> Result<Vec<Rating>, LendingError>;

    /// In-progress loans past due plus grace. Candidates only; callers re-check
    /// under the loan lock.
    async fn overdue_candidates(
        &self,
        now: DateTime<Utc>,
        grace_days: i64,
    ) -> Result<Vec<Uuid>, LendingError>;

    /// Dispute with its notes in posting order
    async fn get_dispute(&self, dispute_id: Uuid) -> Result<Option<Dispute>, LendingError>;

    /// Newest first, without notes
    async fn list_disputes(&self, filter: &DisputeFilter) -> Result<Vec<Dispute>, LendingError>;

    async fn open_disputes_for(&self, loan_id: Uuid) -> Result<Vec<Dispute>, LendingError>;

    async fn insert_report(&self, report: &Report) -> Result<(), LendingError>;

    /// Write `report` only if the stored status is still `expected`, blocking
    /// `block_user` in the same write. Returns false when another writer moved
    /// the report first; nothing is written when the user is unknown.
    async fn update_report(
        &self,
        report: &Report,
        expected: ReportStatus,
        block_user: Option<Uuid>,
    ) -> Result<bool, LendingError>;

    async fn get_report(&self, report_id: Uuid) -> Result<Option<Report>, LendingError>;

    async fn list_reports(
        &self,
        filter: &ReportFilter,
    ) -> Result<PaginatedResponse<Report>, LendingError>;

    /// Lifecycle events of one loan, oldest first
    async fn activity(&self, loan_id: Uuid) -> Result<Vec<LifecycleEvent>, LendingError>;
}
