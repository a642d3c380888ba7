//! In-process store
//!
//! Single-writer-per-loan comes from an async mutex per loan id; committed
//! state lives behind one `RwLock` so readers never wait on a loan's writer,
//! only on the brief moment a batch is applied.

use async_trait::async_trait;
use sqlx::types::chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use super::{LoanChanges, LoanSnapshot, LoanStore, LoanUnit};
use crate::dispute::{Dispute, DisputeFilter, DisputeNote, Report, ReportFilter, ReportStatus};
use crate::error::LendingError;
use crate::events::LifecycleEvent;
use crate::loan::{LoanFilter, LoanRequest, LoanStatus, Rating, RepaymentEntry};
use crate::models::PaginatedResponse;
use crate::verification::{
    UserDirectory, VerificationGate, VerificationState, VerificationStatus,
};

#[derive(Default)]
struct MemoryState {
    loans: HashMap<Uuid, LoanRequest>,
    repayments: HashMap<Uuid, Vec<RepaymentEntry>>,
    /// Stored without notes
    disputes: HashMap<Uuid, Dispute>,
    notes: HashMap<Uuid, Vec<DisputeNote>>,
    ratings: HashMap<Uuid, Vec<Rating>>,
    reports: HashMap<Uuid, Report>,
    activity: HashMap<Uuid, Vec<LifecycleEvent>>,
    users: HashMap<Uuid, VerificationStatus>,
}

impl MemoryState {
    fn snapshot(&self, loan: LoanRequest) -> LoanSnapshot {
        let mut disputes: Vec<Dispute> = self
            .disputes
            .values()
            .filter(|dispute| dispute.loan_request_id == loan.id)
            .cloned()
            .collect();
        disputes.sort_by_key(|dispute| dispute.created_at);

        LoanSnapshot {
            entries: self.repayments.get(&loan.id).cloned().unwrap_or_default(),
            ratings: self.ratings.get(&loan.id).cloned().unwrap_or_default(),
            disputes,
            loan,
        }
    }

    fn apply(&mut self, loan_id: Uuid, changes: LoanChanges) -> Result<(), LendingError> {
        if let Some(rating) = &changes.rating {
            let existing = self.ratings.get(&loan_id);
            if existing.map_or(false, |ratings| {
                ratings.iter().any(|r| r.rater_id == rating.rater_id)
            }) {
                return Err(LendingError::AlreadyRated {
                    loan_id,
                    rater_id: rating.rater_id,
                });
            }
        }

        if let Some(loan) = changes.loan {
            self.loans.insert(loan.id, loan);
        }
        if let Some(entry) = changes.repayment {
            self.repayments.entry(loan_id).or_default().push(entry);
        }
        if let Some(mut dispute) = changes.dispute {
            dispute.notes.clear();
            self.disputes.insert(dispute.id, dispute);
        }
        if let Some(note) = changes.note {
            self.notes.entry(note.dispute_id).or_default().push(note);
        }
        if let Some(rating) = changes.rating {
            self.ratings.entry(loan_id).or_default().push(rating);
        }
        self.activity
            .entry(loan_id)
            .or_default()
            .extend(changes.events);
        Ok(())
    }
}

/// Store backed by process memory. Used by the test suite and
/// `STORE_BACKEND=memory` runs; contents are lost on exit.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
    locks: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or overwrite a user's verification record
    pub async fn upsert_user(&self, user_id: Uuid, state: VerificationState, blocked: bool) {
        let mut guard = self.state.write().await;
        guard.users.insert(
            user_id,
            VerificationStatus {
                user_id,
                state,
                blocked,
            },
        );
    }

    /// Loans are never removed, so a lock entry exists only for known ids
    async fn loan_lock(&self, loan_id: Uuid) -> Result<Arc<Mutex<()>>, LendingError> {
        if !self.state.read().await.loans.contains_key(&loan_id) {
            return Err(LendingError::not_found("loan", loan_id));
        }
        let mut locks = self.locks.lock().await;
        Ok(locks.entry(loan_id).or_default().clone())
    }

    async fn update_user(
        &self,
        user_id: Uuid,
        update: impl FnOnce(&mut VerificationStatus) + Send,
    ) -> Result<VerificationStatus, LendingError> {
        let mut guard = self.state.write().await;
        let status = guard
            .users
            .get_mut(&user_id)
            .ok_or_else(|| LendingError::not_found("user", user_id))?;
        update(status);
        Ok(*status)
    }
}

struct MemoryUnit {
    state: Arc<RwLock<MemoryState>>,
    snapshot: LoanSnapshot,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl LoanUnit for MemoryUnit {
    fn snapshot(&self) -> &LoanSnapshot {
        &self.snapshot
    }

    async fn commit(self: Box<Self>, changes: LoanChanges) -> Result<(), LendingError> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write().await;
        state.apply(self.snapshot.loan.id, changes)
    }
}

#[async_trait]
impl LoanStore for MemoryStore {
    async fn insert_loan(
        &self,
        loan: &LoanRequest,
        event: &LifecycleEvent,
    ) -> Result<(), LendingError> {
        let mut state = self.state.write().await;
        state.loans.insert(loan.id, loan.clone());
        state
            .activity
            .entry(loan.id)
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn lock_loan(&self, loan_id: Uuid) -> Result<Box<dyn LoanUnit>, LendingError> {
        let guard = self.loan_lock(loan_id).await?.lock_owned().await;
        let snapshot = {
            let state = self.state.read().await;
            let loan = state
                .loans
                .get(&loan_id)
                .cloned()
                .ok_or_else(|| LendingError::not_found("loan", loan_id))?;
            state.snapshot(loan)
        };
        Ok(Box::new(MemoryUnit {
            state: self.state.clone(),
            snapshot,
            _guard: guard,
        }))
    }

    async fn get_loan(&self, loan_id: Uuid) -> Result<Option<LoanRequest>, LendingError> {
        Ok(self.state.read().await.loans.get(&loan_id).cloned())
    }

    async fn list_loans(
        &self,
        filter: &LoanFilter,
    ) -> Result<PaginatedResponse<LoanRequest>, LendingError> {
        let state = self.state.read().await;
        let mut loans: Vec<LoanRequest> = state
            .loans
            .values()
            .filter(|loan| filter.matches(loan))
            .cloned()
            .collect();
        loans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(PaginatedResponse::from_all(loans, filter.pagination))
    }

    async fn repayments(&self, loan_id: Uuid) -> Result<Vec<RepaymentEntry>, LendingError> {
        let state = self.state.read().await;
        Ok(state.repayments.get(&loan_id).cloned().unwrap_or_default())
    }

    async fn ratings(&self, loan_id: Uuid) -> Result<Vec<Rating>, LendingError> {
        let state = self.state.read().await;
        Ok(state.ratings.get(&loan_id).cloned().unwrap_or_default())
    }

    async fn overdue_candidates(
        &self,
        now: DateTime<Utc>,
        grace_days: i64,
    ) -> Result<Vec<Uuid>, LendingError> {
        let state = self.state.read().await;
        Ok(state
            .loans
            .values()
            .filter(|loan| loan.status == LoanStatus::InProgress && loan.is_overdue(now, grace_days))
            .map(|loan| loan.id)
            .collect())
    }

    async fn get_dispute(&self, dispute_id: Uuid) -> Result<Option<Dispute>, LendingError> {
        let state = self.state.read().await;
        Ok(state.disputes.get(&dispute_id).cloned().map(|mut dispute| {
            dispute.notes = state.notes.get(&dispute_id).cloned().unwrap_or_default();
            dispute
        }))
    }

    async fn list_disputes(&self, filter: &DisputeFilter) -> Result<Vec<Dispute>, LendingError> {
        let state = self.state.read().await;
        let mut disputes: Vec<Dispute> = state
            .disputes
            .values()
            .filter(|dispute| filter.matches(dispute))
            .cloned()
            .collect();
        disputes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(disputes)
    }

    async fn open_disputes_for(&self, loan_id: Uuid) -> Result<Vec<Dispute>, LendingError> {
        let state = self.state.read().await;
        Ok(state
            .disputes
            .values()
            .filter(|dispute| dispute.loan_request_id == loan_id && dispute.status.is_open())
            .cloned()
            .collect())
    }

    async fn insert_report(&self, report: &Report) -> Result<(), LendingError> {
        let mut state = self.state.write().await;
        state.reports.insert(report.id, report.clone());
        Ok(())
    }

    async fn update_report(
        &self,
        report: &Report,
        expected: ReportStatus,
        block_user: Option<Uuid>,
    ) -> Result<bool, LendingError> {
        let mut state = self.state.write().await;
        match state.reports.get(&report.id) {
            Some(stored) if stored.status == expected => {}
            Some(_) => return Ok(false),
            None => return Err(LendingError::not_found("report", report.id)),
        }
        if let Some(user_id) = block_user {
            let status = state
                .users
                .get_mut(&user_id)
                .ok_or_else(|| LendingError::not_found("user", user_id))?;
            status.blocked = true;
        }
        state.reports.insert(report.id, report.clone());
        Ok(true)
    }

    async fn get_report(&self, report_id: Uuid) -> Result<Option<Report>, LendingError> {
        Ok(self.state.read().await.reports.get(&report_id).cloned())
    }

    async fn list_reports(
        &self,
        filter: &ReportFilter,
    ) -> Result<PaginatedResponse<Report>, LendingError> {
        let state = self.state.read().await;
        let mut reports: Vec<Report> = state
            .reports
            .values()
            .filter(|report| filter.matches(report))
            .cloned()
            .collect();
        reports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(PaginatedResponse::from_all(reports, filter.pagination()))
    }

    async fn activity(&self, loan_id: Uuid) -> Result<Vec<LifecycleEvent>, LendingError> {
        let state = self.state.read().await;
        Ok(state.activity.get(&loan_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl VerificationGate for MemoryStore {
    async fn verification_status(
        &self,
        user_id: Uuid,
    ) -> Result<Option<VerificationStatus>, LendingError> {
        Ok(self.state.read().await.users.get(&user_id).copied())
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn set_verification(
        &self,
        user_id: Uuid,
        state: VerificationState,
    ) -> Result<VerificationStatus, LendingError> {
        self.update_user(user_id, |status| status.state = state).await
    }

    async fn set_blocked(
        &self,
        user_id: Uuid,
        blocked: bool,
    ) -> Result<VerificationStatus, LendingError> {
        self.update_user(user_id, |status| status.blocked = blocked).await
    }
}
