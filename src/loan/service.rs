//! Loan engine - the single entry point for loan mutations
//!
//! Every operation follows the same path: open the loan's unit of work, run
//! the interlock and the transition table against the locked snapshot, stage
//! all writes, commit them together, then publish the lifecycle events.

use rust_decimal::Decimal;
use sqlx::types::chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::finalizer::{self, RateLoanRequest, Rating};
use super::ledger::{BalanceSummary, Ledger, RecordRepaymentRequest, RepaymentEntry, RepaymentReceipt};
use super::lifecycle::{self, Initiator, LoanEvent};
use super::model::{
    AcceptLoanRequest, CreateLoanRequest, ListLoansQuery, LoanFilter, LoanRequest, LoanRole,
    LoanStatus, RejectLoanRequest, UpdateLoanRequest,
};
use crate::dispute::interlock;
use crate::error::LendingError;
use crate::events::{EventBus, LifecycleEvent};
use crate::models::{Actor, PaginatedResponse, PaginationParams, UserRole};
use crate::store::{LoanChanges, LoanSnapshot, LoanStore, LoanUnit};
use crate::verification::{GatedAction, UserDirectory, VerificationState, VerificationStatus};

/// Lending rules that come from configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LendingPolicy {
    /// Flat rate in percent when neither party proposes one
    pub default_interest_rate: Decimal,
    /// Days past the due date before the sweep defaults a loan
    pub grace_days: i64,
}

impl Default for LendingPolicy {
    fn default() -> Self {
        Self {
            default_interest_rate: Decimal::TEN,
            grace_days: 7,
        }
    }
}

/// Outcome of one overdue sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub examined: usize,
    pub defaulted: Vec<Uuid>,
    /// Candidates that no longer qualified once locked
    pub skipped: usize,
    pub failed: usize,
}

/// Loan lifecycle engine
#[derive(Clone)]
pub struct LoanEngine {
    store: Arc<dyn LoanStore>,
    users: Arc<dyn UserDirectory>,
    events: EventBus,
    policy: LendingPolicy,
}

impl LoanEngine {
    pub fn new(
        store: Arc<dyn LoanStore>,
        users: Arc<dyn UserDirectory>,
        events: EventBus,
        policy: LendingPolicy,
    ) -> Self {
        Self {
            store,
            users,
            events,
            policy,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub(crate) fn store(&self) -> &Arc<dyn LoanStore> {
        &self.store
    }

    /// Create a pending loan request for the calling borrower
    pub async fn create_loan(
        &self,
        actor: Actor,
        request: CreateLoanRequest,
    ) -> Result<LoanRequest, LendingError> {
        request.validate()?;
        if actor.role != UserRole::Borrower {
            return Err(LendingError::Forbidden(
                "only borrowers can request loans".to_string(),
            ));
        }
        self.check_gate(actor.user_id, GatedAction::CreateLoan).await?;

        let now = Utc::now();
        let loan = LoanRequest::new(actor.user_id, &request, now);
        let event = LifecycleEvent::new(
            loan.id,
            None,
            LoanStatus::Pending,
            Initiator::Borrower(actor.user_id),
            now,
        );
        self.store.insert_loan(&loan, &event).await?;

        tracing::info!(
            loan_id = %loan.id,
            borrower_id = %loan.borrower_id,
            amount = %loan.amount,
            duration_days = loan.duration_days,
            "Loan request created"
        );
        self.events.publish([event]);
        Ok(loan)
    }

    /// Edit a pending request. Not a transition; no event is emitted.
    pub async fn update_loan(
        &self,
        actor: Actor,
        loan_id: Uuid,
        request: UpdateLoanRequest,
    ) -> Result<LoanRequest, LendingError> {
        request.validate()?;
        let unit = self.store.lock_loan(loan_id).await?;
        let mut loan = unit.snapshot().loan.clone();

        if actor.user_id != loan.borrower_id {
            return Err(LendingError::Forbidden(
                "only the borrower can edit this loan request".to_string(),
            ));
        }
        if loan.status != LoanStatus::Pending {
            return Err(LendingError::invalid_state(loan.status, "edit a loan request"));
        }

        if let Some(amount) = request.amount {
            loan.amount = amount;
        }
        if let Some(purpose) = &request.purpose {
            loan.purpose = purpose.trim().to_string();
        }
        if let Some(duration_days) = request.duration_days {
            loan.duration_days = duration_days;
        }
        if request.interest_rate.is_some() {
            loan.proposed_interest_rate = request.interest_rate;
        }
        loan.updated_at = Utc::now();

        unit.commit(LoanChanges {
            loan: Some(loan.clone()),
            ..Default::default()
        })
        .await?;
        tracing::info!(loan_id = %loan.id, "Loan request updated");
        Ok(loan)
    }

    /// Lender accepts a pending request, fixing the interest rate
    pub async fn accept_loan(
        &self,
        actor: Actor,
        loan_id: Uuid,
        request: AcceptLoanRequest,
    ) -> Result<LoanRequest, LendingError> {
        request.validate()?;
        if actor.role == UserRole::Lender {
            self.check_gate(actor.user_id, GatedAction::AcceptLoan).await?;
        }

        let unit = self.store.lock_loan(loan_id).await?;
        let initiator = initiator_for(&unit.snapshot().loan, &actor, LoanEvent::Accept)?;
        let mut loan = unit.snapshot().loan.clone();
        let now = Utc::now();
        let event = step(unit.snapshot(), &mut loan, LoanEvent::Accept, initiator, now)?;

        loan.lender_id = Some(actor.user_id);
        loan.interest_rate = Some(
            request
                .interest_rate
                .or(loan.proposed_interest_rate)
                .unwrap_or(self.policy.default_interest_rate),
        );

        self.finish(unit, loan, LoanChanges::default(), vec![event])
            .await
    }

    /// Borrower withdraws a pending request
    pub async fn cancel_loan(&self, actor: Actor, loan_id: Uuid) -> Result<LoanRequest, LendingError> {
        self.simple_transition(actor, loan_id, LoanEvent::Cancel).await
    }

    /// Lender attests that the money was handed over
    pub async fn fulfill_loan(&self, actor: Actor, loan_id: Uuid) -> Result<LoanRequest, LendingError> {
        self.simple_transition(actor, loan_id, LoanEvent::Fulfill).await
    }

    /// Administrator rejects a pending request
    pub async fn reject_loan(
        &self,
        actor: Actor,
        loan_id: Uuid,
        request: RejectLoanRequest,
    ) -> Result<LoanRequest, LendingError> {
        require_admin(&actor)?;
        let loan = self.simple_transition(actor, loan_id, LoanEvent::Reject).await?;
        if let Some(reason) = request.reason.as_deref() {
            tracing::info!(loan_id = %loan_id, reason, "Loan request rejected");
        }
        Ok(loan)
    }

    /// Administrator defaults an in-progress loan
    pub async fn default_loan(&self, actor: Actor, loan_id: Uuid) -> Result<LoanRequest, LendingError> {
        require_admin(&actor)?;
        self.simple_transition(actor, loan_id, LoanEvent::AdminDefault)
            .await
    }

    async fn simple_transition(
        &self,
        actor: Actor,
        loan_id: Uuid,
        event: LoanEvent,
    ) -> Result<LoanRequest, LendingError> {
        let unit = self.store.lock_loan(loan_id).await?;
        let initiator = initiator_for(&unit.snapshot().loan, &actor, event)?;
        let mut loan = unit.snapshot().loan.clone();
        let lifecycle_event = step(unit.snapshot(), &mut loan, event, initiator, Utc::now())?;
        self.finish(unit, loan, LoanChanges::default(), vec![lifecycle_event])
            .await
    }

    /// Append a repayment to the ledger, moving the loan to in_progress on
    /// the first entry and to completed when the balance reaches zero.
    ///
    /// Entry, status change and audit rows commit as one unit.
    pub async fn record_repayment(
        &self,
        actor: Actor,
        loan_id: Uuid,
        request: RecordRepaymentRequest,
    ) -> Result<RepaymentReceipt, LendingError> {
        request.validate()?;
        let unit = self.store.lock_loan(loan_id).await?;
        let snapshot = unit.snapshot();
        let mut loan = snapshot.loan.clone();
        let ledger = Ledger::new(loan.total_due(), &snapshot.entries);

        if request.amount <= Decimal::ZERO {
            return Err(LendingError::InvalidAmount {
                amount: request.amount,
                outstanding: ledger.outstanding(),
            });
        }
        interlock::ensure_unfrozen(&loan, &snapshot.disputes, LoanEvent::RecordRepayment)?;
        if !loan.status.accepts_repayments() {
            return Err(LendingError::invalid_state(loan.status, "record a repayment"));
        }
        if loan.lender_id != Some(actor.user_id) {
            return Err(LendingError::Forbidden(
                "only the loan's lender can record repayments".to_string(),
            ));
        }
        let outcome = ledger.check(request.amount)?;

        let now = Utc::now();
        let lender = Initiator::Lender(actor.user_id);
        let mut events = Vec::new();
        if loan.status == LoanStatus::Fulfilled {
            events.push(step(snapshot, &mut loan, LoanEvent::RecordRepayment, lender, now)?);
        }
        if outcome.fully_repaid {
            events.push(step(snapshot, &mut loan, LoanEvent::FullyRepaid, Initiator::System, now)?);
        }
        loan.updated_at = now;

        let entry = RepaymentEntry {
            id: Uuid::new_v4(),
            loan_request_id: loan.id,
            amount: request.amount,
            payment_method: request.payment_method,
            transaction_reference: trimmed(request.transaction_reference),
            remarks: trimmed(request.remarks),
            recorded_by: actor.user_id,
            recorded_at: now,
        };
        let changes = LoanChanges {
            repayment: Some(entry.clone()),
            ..Default::default()
        };

        let loan = self.finish(unit, loan, changes, events).await?;
        tracing::info!(
            loan_id = %loan.id,
            amount = %entry.amount,
            outstanding = %outcome.remaining,
            "Repayment recorded"
        );

        Ok(RepaymentReceipt {
            entry,
            outstanding_balance: outcome.remaining,
            status: loan.status,
        })
    }

    /// Default every in-progress loan past due plus grace.
    ///
    /// Each candidate is re-checked under its lock, so loans repaid, disputed
    /// or already defaulted since the candidate query are skipped. Running the
    /// sweep twice is harmless.
    pub async fn sweep_overdue(&self, now: DateTime<Utc>) -> Result<SweepSummary, LendingError> {
        let candidates = self
            .store
            .overdue_candidates(now, self.policy.grace_days)
            .await?;
        let mut summary = SweepSummary {
            examined: candidates.len(),
            ..Default::default()
        };

        for loan_id in candidates {
            match self.default_if_overdue(loan_id, now).await {
                Ok(true) => summary.defaulted.push(loan_id),
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    tracing::warn!(loan_id = %loan_id, error = %e, "Overdue sweep failed for loan");
                    summary.failed += 1;
                }
            }
        }

        if !summary.defaulted.is_empty() || summary.failed > 0 {
            tracing::info!(
                examined = summary.examined,
                defaulted = summary.defaulted.len(),
                skipped = summary.skipped,
                failed = summary.failed,
                "Overdue sweep finished"
            );
        }
        Ok(summary)
    }

    async fn default_if_overdue(&self, loan_id: Uuid, now: DateTime<Utc>) -> Result<bool, LendingError> {
        let unit = self.store.lock_loan(loan_id).await?;
        let snapshot = unit.snapshot();
        if snapshot.loan.status != LoanStatus::InProgress
            || !snapshot.loan.is_overdue(now, self.policy.grace_days)
            || interlock::is_frozen(&snapshot.loan, &snapshot.disputes)
        {
            return Ok(false);
        }

        let mut loan = snapshot.loan.clone();
        let event = step(snapshot, &mut loan, LoanEvent::OverdueDefault, Initiator::System, now)?;
        self.finish(unit, loan, LoanChanges::default(), vec![event])
            .await?;
        Ok(true)
    }

    /// Rate the other party of a completed loan
    pub async fn rate_loan(
        &self,
        actor: Actor,
        loan_id: Uuid,
        request: RateLoanRequest,
    ) -> Result<Rating, LendingError> {
        let unit = self.store.lock_loan(loan_id).await?;
        let snapshot = unit.snapshot();
        let rating = finalizer::prepare_rating(
            &snapshot.loan,
            &snapshot.ratings,
            actor.user_id,
            &request,
            Utc::now(),
        )?;
        unit.commit(LoanChanges {
            rating: Some(rating.clone()),
            ..Default::default()
        })
        .await?;
        tracing::info!(loan_id = %loan_id, rater_id = %rating.rater_id, score = rating.score, "Loan rated");
        Ok(rating)
    }

    /// Pending requests are visible to every caller; anything else only to
    /// its parties and administrators.
    pub async fn get_loan(&self, actor: Actor, loan_id: Uuid) -> Result<LoanRequest, LendingError> {
        let loan = self
            .store
            .get_loan(loan_id)
            .await?
            .ok_or_else(|| LendingError::not_found("loan", loan_id))?;
        if loan.status != LoanStatus::Pending {
            ensure_visible(&loan, &actor)?;
        }
        Ok(loan)
    }

    /// The caller's own loans
    pub async fn list_loans(
        &self,
        actor: Actor,
        query: ListLoansQuery,
    ) -> Result<PaginatedResponse<LoanRequest>, LendingError> {
        let role = query.role.or(match actor.role {
            UserRole::Borrower => Some(LoanRole::Borrower),
            UserRole::Lender => Some(LoanRole::Lender),
            UserRole::Admin => None,
        });
        let filter = LoanFilter {
            borrower_id: (role == Some(LoanRole::Borrower)).then_some(actor.user_id),
            lender_id: (role == Some(LoanRole::Lender)).then_some(actor.user_id),
            exclude_borrower_id: None,
            status: query.status,
            pagination: PaginationParams {
                page: query.page,
                limit: query.limit,
            },
        };
        self.store.list_loans(&filter).await
    }

    /// Open marketplace: pending requests from other borrowers
    pub async fn list_pending(
        &self,
        actor: Actor,
        pagination: PaginationParams,
    ) -> Result<PaginatedResponse<LoanRequest>, LendingError> {
        let filter = LoanFilter {
            exclude_borrower_id: Some(actor.user_id),
            status: Some(LoanStatus::Pending),
            pagination,
            ..Default::default()
        };
        self.store.list_loans(&filter).await
    }

    pub async fn balance(&self, actor: Actor, loan_id: Uuid) -> Result<BalanceSummary, LendingError> {
        let loan = self.visible_loan(actor, loan_id).await?;
        let entries = self.store.repayments(loan_id).await?;
        let ledger = Ledger::new(loan.total_due(), &entries);
        Ok(BalanceSummary {
            loan_id,
            status: loan.status,
            principal: loan.amount,
            interest_rate: loan.interest_rate,
            total_due: ledger.total_due(),
            total_repaid: ledger.total_repaid(),
            outstanding_balance: ledger.outstanding(),
            entry_count: ledger.len(),
        })
    }

    pub async fn repayments(
        &self,
        actor: Actor,
        loan_id: Uuid,
    ) -> Result<Vec<RepaymentEntry>, LendingError> {
        self.visible_loan(actor, loan_id).await?;
        self.store.repayments(loan_id).await
    }

    pub async fn ratings(&self, actor: Actor, loan_id: Uuid) -> Result<Vec<Rating>, LendingError> {
        self.visible_loan(actor, loan_id).await?;
        self.store.ratings(loan_id).await
    }

    /// Audit trail of one loan
    pub async fn activity(
        &self,
        actor: Actor,
        loan_id: Uuid,
    ) -> Result<Vec<LifecycleEvent>, LendingError> {
        self.visible_loan(actor, loan_id).await?;
        self.store.activity(loan_id).await
    }

    pub async fn set_user_verification(
        &self,
        actor: Actor,
        user_id: Uuid,
        state: VerificationState,
    ) -> Result<VerificationStatus, LendingError> {
        require_admin(&actor)?;
        let status = self.users.set_verification(user_id, state).await?;
        tracing::info!(user_id = %user_id, state = %state, admin_id = %actor.user_id, "Verification status set");
        Ok(status)
    }

    pub async fn set_user_blocked(
        &self,
        actor: Actor,
        user_id: Uuid,
        blocked: bool,
    ) -> Result<VerificationStatus, LendingError> {
        require_admin(&actor)?;
        let status = self.users.set_blocked(user_id, blocked).await?;
        tracing::info!(user_id = %user_id, blocked, admin_id = %actor.user_id, "Block flag set");
        Ok(status)
    }

    async fn check_gate(&self, user_id: Uuid, action: GatedAction) -> Result<(), LendingError> {
        self.users
            .is_eligible(user_id, action)
            .await?
            .into_result(user_id)
    }

    async fn visible_loan(&self, actor: Actor, loan_id: Uuid) -> Result<LoanRequest, LendingError> {
        let loan = self
            .store
            .get_loan(loan_id)
            .await?
            .ok_or_else(|| LendingError::not_found("loan", loan_id))?;
        ensure_visible(&loan, &actor)?;
        Ok(loan)
    }

    /// Commit `loan` with `changes`, then publish `events`
    pub(crate) async fn finish(
        &self,
        unit: Box<dyn LoanUnit>,
        loan: LoanRequest,
        mut changes: LoanChanges,
        events: Vec<LifecycleEvent>,
    ) -> Result<LoanRequest, LendingError> {
        changes.loan = Some(loan.clone());
        changes.events = events.clone();
        unit.commit(changes).await?;

        for event in &events {
            tracing::info!(
                loan_id = %event.loan_id,
                from = ?event.from_status,
                to = %event.to_status,
                actor = event.actor.kind(),
                "Loan status changed"
            );
        }
        self.events.publish(events);
        Ok(loan)
    }
}

/// Apply `event` to `loan` in memory: interlock, transition table, then the
/// bookkeeping each event carries. Nothing is written.
pub(crate) fn step(
    snapshot: &LoanSnapshot,
    loan: &mut LoanRequest,
    event: LoanEvent,
    initiator: Initiator,
    now: DateTime<Utc>,
) -> Result<LifecycleEvent, LendingError> {
    if let Err(e) = interlock::ensure_unfrozen(loan, &snapshot.disputes, event) {
        tracing::debug!(loan_id = %loan.id, event = %event, "Transition refused: loan disputed");
        return Err(e);
    }
    let to = lifecycle::next_status(loan, event, initiator).map_err(|e| {
        tracing::debug!(loan_id = %loan.id, current = %loan.status, event = %event, error = %e, "Transition refused");
        e
    })?;
    let from = loan.status;

    match event {
        LoanEvent::Accept => loan.accepted_at = Some(now),
        LoanEvent::Fulfill => loan.fulfilled_at = Some(now),
        LoanEvent::FullyRepaid => loan.completed_at = Some(now),
        LoanEvent::DisputeOpened => loan.pre_dispute_status = Some(from),
        LoanEvent::DisputeContinued | LoanEvent::DisputeDefaulted => {
            loan.pre_dispute_status = None
        }
        LoanEvent::DisputeCancelled => {
            loan.pre_dispute_status = None;
            loan.lender_id = None;
        }
        _ => {}
    }
    loan.status = to;
    loan.updated_at = now;

    Ok(LifecycleEvent::new(loan.id, Some(from), to, initiator, now))
}

/// Map the caller onto the loan party they act as for `event`.
///
/// Any lender may attempt `Accept`; whether the loan can still be taken is
/// left to the transition table.
fn initiator_for(
    loan: &LoanRequest,
    actor: &Actor,
    event: LoanEvent,
) -> Result<Initiator, LendingError> {
    if actor.is_admin() {
        return Ok(Initiator::Admin(actor.user_id));
    }
    if actor.user_id == loan.borrower_id {
        return Ok(Initiator::Borrower(actor.user_id));
    }
    match loan.lender_id {
        Some(lender_id) if lender_id == actor.user_id => Ok(Initiator::Lender(actor.user_id)),
        None if actor.role == UserRole::Lender => Ok(Initiator::Lender(actor.user_id)),
        Some(_) if event == LoanEvent::Accept && actor.role == UserRole::Lender => {
            Ok(Initiator::Lender(actor.user_id))
        }
        _ => Err(LendingError::Forbidden(
            "not a party to this loan".to_string(),
        )),
    }
}

fn ensure_visible(loan: &LoanRequest, actor: &Actor) -> Result<(), LendingError> {
    if actor.is_admin() || loan.is_party(actor.user_id) {
        Ok(())
    } else {
        Err(LendingError::Forbidden(
            "not a party to this loan".to_string(),
        ))
    }
}

pub(crate) fn require_admin(actor: &Actor) -> Result<(), LendingError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(LendingError::Forbidden(
            "administrator access required".to_string(),
        ))
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
