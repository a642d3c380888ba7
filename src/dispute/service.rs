//! Dispute and report operations
//!
//! Disputes mutate their loan, so they run inside the loan's unit of work on
//! [`LoanEngine`]. Reports touch no loan and live on [`ReportService`].

use sqlx::types::chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::interlock;
use super::model::{
    AddDisputeNoteRequest, Dispute, DisputeFilter, DisputeNote, DisputeOutcome, DisputeStatus,
    FileDisputeRequest, FileReportRequest, Report, ReportFilter, ReportStatus,
    ResolveDisputeRequest, UpdateReportRequest,
};
use crate::error::LendingError;
use crate::loan::service::{require_admin, step};
use crate::loan::{Initiator, LoanEngine, LoanEvent, LoanStatus};
use crate::models::{Actor, PaginatedResponse};
use crate::store::{LoanChanges, LoanStore};
use crate::verification::UserDirectory;

impl LoanEngine {
    /// Raise a dispute against the other party of a loan.
    ///
    /// The first open dispute freezes the loan (`disputed`); further disputes
    /// on an already frozen loan are recorded without a transition.
    pub async fn file_dispute(
        &self,
        actor: Actor,
        request: FileDisputeRequest,
    ) -> Result<Dispute, LendingError> {
        request.validate()?;
        let unit = self.store().lock_loan(request.loan_request_id).await?;
        let snapshot = unit.snapshot();
        let mut loan = snapshot.loan.clone();

        if !loan.is_party(actor.user_id) {
            return Err(LendingError::Forbidden(
                "only the borrower or lender can dispute this loan".to_string(),
            ));
        }
        if loan.counterparty_of(actor.user_id) != Some(request.against_user_id) {
            return Err(LendingError::Validation(
                "a dispute must be raised against the other party of the loan".to_string(),
            ));
        }

        let now = Utc::now();
        let mut events = Vec::new();
        if loan.status != LoanStatus::Disputed {
            events.push(step(snapshot, &mut loan, LoanEvent::DisputeOpened, Initiator::System, now)?);
        }

        let dispute = Dispute {
            id: Uuid::new_v4(),
            loan_request_id: loan.id,
            raised_by: actor.user_id,
            against_user_id: request.against_user_id,
            dispute_type: request.dispute_type,
            description: request.description.trim().to_string(),
            disputed_amount: request.disputed_amount,
            status: DisputeStatus::Open,
            resolution: None,
            outcome: None,
            resolved_by: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
            notes: Vec::new(),
        };
        let changes = LoanChanges {
            dispute: Some(dispute.clone()),
            ..Default::default()
        };
        self.finish(unit, loan, changes, events).await?;

        tracing::info!(
            dispute_id = %dispute.id,
            loan_id = %dispute.loan_request_id,
            raised_by = %dispute.raised_by,
            dispute_type = ?dispute.dispute_type,
            "Dispute filed"
        );
        Ok(dispute)
    }

    /// Append a note to an open dispute
    pub async fn add_dispute_note(
        &self,
        actor: Actor,
        dispute_id: Uuid,
        request: AddDisputeNoteRequest,
    ) -> Result<DisputeNote, LendingError> {
        request.validate()?;
        let loan_id = self.dispute_loan(dispute_id).await?;
        let unit = self.store().lock_loan(loan_id).await?;
        let mut dispute = unit
            .snapshot()
            .dispute(dispute_id)
            .cloned()
            .ok_or_else(|| LendingError::not_found("dispute", dispute_id))?;

        if !actor.is_admin() && !dispute.involves(actor.user_id) {
            return Err(LendingError::Forbidden(
                "only the dispute's parties or an administrator can add notes".to_string(),
            ));
        }
        if !dispute.status.is_open() {
            return Err(LendingError::invalid_state(dispute.status, "add a note to a dispute"));
        }

        let now = Utc::now();
        let note = DisputeNote {
            id: Uuid::new_v4(),
            dispute_id,
            author_id: actor.user_id,
            text: request.text.trim().to_string(),
            evidence: request
                .evidence
                .map(|evidence| evidence.trim().to_string())
                .filter(|evidence| !evidence.is_empty()),
            created_at: now,
        };
        dispute.updated_at = now;

        unit.commit(LoanChanges {
            dispute: Some(dispute),
            note: Some(note.clone()),
            ..Default::default()
        })
        .await?;
        tracing::debug!(dispute_id = %dispute_id, author_id = %actor.user_id, "Dispute note added");
        Ok(note)
    }

    /// Administrator review or settlement of a dispute.
    ///
    /// `under_review` keeps the loan frozen. `resolved` and `closed` apply the
    /// outcome: `continue` resumes the loan once no other dispute is open,
    /// `default` and `cancel` end it.
    pub async fn resolve_dispute(
        &self,
        actor: Actor,
        dispute_id: Uuid,
        request: ResolveDisputeRequest,
    ) -> Result<Dispute, LendingError> {
        require_admin(&actor)?;
        request.validate()?;
        let loan_id = self.dispute_loan(dispute_id).await?;
        let unit = self.store().lock_loan(loan_id).await?;
        let snapshot = unit.snapshot();
        let mut dispute = snapshot
            .dispute(dispute_id)
            .cloned()
            .ok_or_else(|| LendingError::not_found("dispute", dispute_id))?;
        let mut loan = snapshot.loan.clone();
        let now = Utc::now();
        let admin = Initiator::Admin(actor.user_id);
        let mut events = Vec::new();

        match request.status {
            DisputeStatus::Open => {
                return Err(LendingError::Validation(
                    "a dispute cannot be reopened".to_string(),
                ))
            }
            DisputeStatus::UnderReview => {
                if dispute.status != DisputeStatus::Open {
                    return Err(LendingError::invalid_state(dispute.status, "review a dispute"));
                }
            }
            DisputeStatus::Resolved | DisputeStatus::Closed => {
                if !dispute.status.is_open() {
                    return Err(LendingError::invalid_state(dispute.status, "settle a dispute"));
                }
                dispute.outcome = Some(request.outcome);
                dispute.resolved_by = Some(actor.user_id);
                dispute.resolved_at = Some(now);

                if loan.status == LoanStatus::Disputed {
                    let event = match request.outcome {
                        DisputeOutcome::Continue
                            if interlock::others_open(&snapshot.disputes, dispute_id) == 0 =>
                        {
                            Some(LoanEvent::DisputeContinued)
                        }
                        DisputeOutcome::Continue => None,
                        DisputeOutcome::Default => Some(LoanEvent::DisputeDefaulted),
                        DisputeOutcome::Cancel => Some(LoanEvent::DisputeCancelled),
                    };
                    if let Some(event) = event {
                        let initiator = if event == LoanEvent::DisputeContinued {
                            Initiator::System
                        } else {
                            admin
                        };
                        events.push(step(snapshot, &mut loan, event, initiator, now)?);
                    }
                } else if request.outcome != DisputeOutcome::Continue {
                    return Err(LendingError::invalid_state(
                        loan.status,
                        "apply a dispute ruling to the loan",
                    ));
                }
            }
        }

        dispute.status = request.status;
        if let Some(resolution) = request.resolution.as_deref().map(str::trim) {
            if !resolution.is_empty() {
                dispute.resolution = Some(resolution.to_string());
            }
        }
        dispute.updated_at = now;

        let changes = LoanChanges {
            dispute: Some(dispute.clone()),
            ..Default::default()
        };
        if events.is_empty() {
            unit.commit(changes).await?;
        } else {
            self.finish(unit, loan, changes, events).await?;
        }

        tracing::info!(
            dispute_id = %dispute_id,
            loan_id = %loan_id,
            status = %dispute.status,
            outcome = ?dispute.outcome,
            admin_id = %actor.user_id,
            "Dispute updated"
        );
        Ok(dispute)
    }

    /// Dispute with its notes, visible to its parties and administrators
    pub async fn get_dispute(&self, actor: Actor, dispute_id: Uuid) -> Result<Dispute, LendingError> {
        let dispute = self
            .store()
            .get_dispute(dispute_id)
            .await?
            .ok_or_else(|| LendingError::not_found("dispute", dispute_id))?;
        if !actor.is_admin() && !dispute.involves(actor.user_id) {
            return Err(LendingError::Forbidden(
                "not a party to this dispute".to_string(),
            ));
        }
        Ok(dispute)
    }

    /// Administrators see every dispute; users those raised by or against them
    pub async fn list_disputes(
        &self,
        actor: Actor,
        mut filter: DisputeFilter,
    ) -> Result<Vec<Dispute>, LendingError> {
        filter.involving = if actor.is_admin() {
            None
        } else {
            Some(actor.user_id)
        };
        self.store().list_disputes(&filter).await
    }

    /// Open disputes currently freezing `loan_id`
    pub async fn open_disputes_for(&self, loan_id: Uuid) -> Result<Vec<Dispute>, LendingError> {
        self.store().open_disputes_for(loan_id).await
    }

    async fn dispute_loan(&self, dispute_id: Uuid) -> Result<Uuid, LendingError> {
        self.store()
            .get_dispute(dispute_id)
            .await?
            .map(|dispute| dispute.loan_request_id)
            .ok_or_else(|| LendingError::not_found("dispute", dispute_id))
    }
}

/// Conduct reports. Filing one never freezes a loan; resolving one may block
/// the reported user through the verification collaborator.
#[derive(Clone)]
pub struct ReportService {
    store: Arc<dyn LoanStore>,
    users: Arc<dyn UserDirectory>,
}

impl ReportService {
    pub fn new(store: Arc<dyn LoanStore>, users: Arc<dyn UserDirectory>) -> Self {
        Self { store, users }
    }

    pub async fn file_report(
        &self,
        actor: Actor,
        request: FileReportRequest,
    ) -> Result<Report, LendingError> {
        request.validate()?;
        if request.reported_user_id == actor.user_id {
            return Err(LendingError::Validation(
                "you cannot report yourself".to_string(),
            ));
        }
        if self
            .users
            .verification_status(request.reported_user_id)
            .await?
            .is_none()
        {
            return Err(LendingError::not_found("user", request.reported_user_id));
        }
        if let Some(loan_id) = request.loan_request_id {
            if self.store.get_loan(loan_id).await?.is_none() {
                return Err(LendingError::not_found("loan", loan_id));
            }
        }

        let now = Utc::now();
        let report = Report {
            id: Uuid::new_v4(),
            reporter_id: actor.user_id,
            reported_user_id: request.reported_user_id,
            loan_request_id: request.loan_request_id,
            report_type: request.report_type,
            description: request.description.trim().to_string(),
            status: ReportStatus::Pending,
            resolution: None,
            resolved_by: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_report(&report).await?;

        tracing::info!(
            report_id = %report.id,
            reporter_id = %report.reporter_id,
            reported_user_id = %report.reported_user_id,
            report_type = ?report.report_type,
            "Report filed"
        );
        Ok(report)
    }

    /// Administrator moves a report along; resolving with `block_user` blocks
    /// the reported user.
    pub async fn update_report(
        &self,
        actor: Actor,
        report_id: Uuid,
        request: UpdateReportRequest,
    ) -> Result<Report, LendingError> {
        require_admin(&actor)?;
        request.validate()?;
        let current = self
            .store
            .get_report(report_id)
            .await?
            .ok_or_else(|| LendingError::not_found("report", report_id))?;

        if !current.status.can_move_to(request.status) {
            return Err(LendingError::invalid_state(
                current.status,
                format!("move a report to {}", request.status),
            ));
        }

        let mut report = current.clone();
        report.status = request.status;
        if let Some(resolution) = request.resolution.as_deref().map(str::trim) {
            if !resolution.is_empty() {
                report.resolution = Some(resolution.to_string());
            }
        }
        if matches!(request.status, ReportStatus::Resolved | ReportStatus::Dismissed) {
            report.resolved_by = Some(actor.user_id);
        }
        report.updated_at = Utc::now();

        let block_user = (request.block_user && request.status == ReportStatus::Resolved)
            .then_some(report.reported_user_id);
        if !self
            .store
            .update_report(&report, current.status, block_user)
            .await?
        {
            return Err(LendingError::invalid_state(
                "changed by another administrator",
                "update a report",
            ));
        }

        if let Some(user_id) = block_user {
            tracing::warn!(report_id = %report_id, user_id = %user_id, "Reported user blocked");
        }

        tracing::info!(report_id = %report_id, status = %report.status, admin_id = %actor.user_id, "Report updated");
        Ok(report)
    }

    pub async fn get_report(&self, actor: Actor, report_id: Uuid) -> Result<Report, LendingError> {
        let report = self
            .store
            .get_report(report_id)
            .await?
            .ok_or_else(|| LendingError::not_found("report", report_id))?;
        if !actor.is_admin() && report.reporter_id != actor.user_id {
            return Err(LendingError::Forbidden(
                "not the reporter of this report".to_string(),
            ));
        }
        Ok(report)
    }

    /// Reports filed by the caller
    pub async fn my_reports(
        &self,
        actor: Actor,
        mut filter: ReportFilter,
    ) -> Result<PaginatedResponse<Report>, LendingError> {
        filter.reporter_id = Some(actor.user_id);
        self.store.list_reports(&filter).await
    }

    /// Every report, for administrators
    pub async fn list_reports(
        &self,
        actor: Actor,
        filter: ReportFilter,
    ) -> Result<PaginatedResponse<Report>, LendingError> {
        require_admin(&actor)?;
        self.store.list_reports(&filter).await
    }
}
