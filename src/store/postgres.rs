//! PostgreSQL store
//!
//! A loan unit is a transaction holding `SELECT ... FOR UPDATE` on the loan
//! row. Every write of an operation goes through that transaction and lands
//! with one `COMMIT`; dropping the unit rolls it back.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::types::chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::{LoanChanges, LoanSnapshot, LoanStore, LoanUnit};
use crate::dispute::{Dispute, DisputeFilter, DisputeNote, Report, ReportFilter, ReportStatus};
use crate::error::LendingError;
use crate::events::LifecycleEvent;
use crate::loan::{Initiator, LoanFilter, LoanRequest, LoanStatus, Rating, RepaymentEntry};
use crate::models::PaginatedResponse;
use crate::verification::{
    UserDirectory, VerificationGate, VerificationState, VerificationStatus,
};

const VERIFICATION_COLUMNS: &str =
    "id AS user_id, verification_status AS state, is_blocked AS blocked";

/// Store backed by the PostgreSQL schema in `migrations/`
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ActivityRow {
    id: Uuid,
    loan_request_id: Uuid,
    from_status: Option<LoanStatus>,
    to_status: LoanStatus,
    actor_kind: String,
    actor_id: Option<Uuid>,
    occurred_at: DateTime<Utc>,
}

impl TryFrom<ActivityRow> for LifecycleEvent {
    type Error = LendingError;

    fn try_from(row: ActivityRow) -> Result<Self, Self::Error> {
        let actor = Initiator::from_parts(&row.actor_kind, row.actor_id).ok_or_else(|| {
            LendingError::Storage(format!(
                "activity log {} has unknown actor '{}'",
                row.id, row.actor_kind
            ))
        })?;
        Ok(LifecycleEvent {
            id: row.id,
            loan_id: row.loan_request_id,
            from_status: row.from_status,
            to_status: row.to_status,
            actor,
            occurred_at: row.occurred_at,
        })
    }
}

async fn insert_event(
    tx: &mut Transaction<'static, Postgres>,
    event: &LifecycleEvent,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO activity_logs (id, loan_request_id, from_status, to_status, actor_kind, actor_id, occurred_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(event.id)
    .bind(event.loan_id)
    .bind(event.from_status)
    .bind(event.to_status)
    .bind(event.actor.kind())
    .bind(event.actor.user_id())
    .bind(event.occurred_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

struct PgUnit {
    tx: Transaction<'static, Postgres>,
    snapshot: LoanSnapshot,
}

impl PgUnit {
    async fn write(&mut self, changes: LoanChanges) -> Result<(), sqlx::Error> {
        if let Some(loan) = &changes.loan {
            sqlx::query(
                r#"
                UPDATE loan_requests
                SET lender_id = $2, amount = $3, purpose = $4, duration_days = $5,
                    proposed_interest_rate = $6, interest_rate = $7, status = $8,
                    pre_dispute_status = $9, accepted_at = $10, fulfilled_at = $11,
                    completed_at = $12, updated_at = $13
                WHERE id = $1
                "#,
            )
            .bind(loan.id)
            .bind(loan.lender_id)
            .bind(loan.amount)
            .bind(&loan.purpose)
            .bind(loan.duration_days)
            .bind(loan.proposed_interest_rate)
            .bind(loan.interest_rate)
            .bind(loan.status)
            .bind(loan.pre_dispute_status)
            .bind(loan.accepted_at)
            .bind(loan.fulfilled_at)
            .bind(loan.completed_at)
            .bind(loan.updated_at)
            .execute(&mut *self.tx)
            .await?;
        }

        if let Some(entry) = &changes.repayment {
            sqlx::query(
                r#"
                INSERT INTO repayments (
                    id, loan_request_id, amount, payment_method,
                    transaction_reference, remarks, recorded_by, recorded_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(entry.id)
            .bind(entry.loan_request_id)
            .bind(entry.amount)
            .bind(entry.payment_method)
            .bind(&entry.transaction_reference)
            .bind(&entry.remarks)
            .bind(entry.recorded_by)
            .bind(entry.recorded_at)
            .execute(&mut *self.tx)
            .await?;
        }

        if let Some(dispute) = &changes.dispute {
            sqlx::query(
                r#"
                INSERT INTO disputes (
                    id, loan_request_id, raised_by, against_user_id, dispute_type,
                    description, disputed_amount, status, resolution, outcome,
                    resolved_by, resolved_at, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                ON CONFLICT (id) DO UPDATE
                SET status = EXCLUDED.status,
                    resolution = EXCLUDED.resolution,
                    outcome = EXCLUDED.outcome,
                    resolved_by = EXCLUDED.resolved_by,
                    resolved_at = EXCLUDED.resolved_at,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(dispute.id)
            .bind(dispute.loan_request_id)
            .bind(dispute.raised_by)
            .bind(dispute.against_user_id)
            .bind(dispute.dispute_type)
            .bind(&dispute.description)
            .bind(dispute.disputed_amount)
            .bind(dispute.status)
            .bind(&dispute.resolution)
            .bind(dispute.outcome)
            .bind(dispute.resolved_by)
            .bind(dispute.resolved_at)
            .bind(dispute.created_at)
            .bind(dispute.updated_at)
            .execute(&mut *self.tx)
            .await?;
        }

        if let Some(note) = &changes.note {
            sqlx::query(
                r#"
                INSERT INTO dispute_notes (id, dispute_id, author_id, text, evidence, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(note.id)
            .bind(note.dispute_id)
            .bind(note.author_id)
            .bind(&note.text)
            .bind(&note.evidence)
            .bind(note.created_at)
            .execute(&mut *self.tx)
            .await?;
        }

        if let Some(rating) = &changes.rating {
            sqlx::query(
                r#"
                INSERT INTO ratings (id, loan_request_id, rater_id, ratee_id, score, review, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(rating.id)
            .bind(rating.loan_request_id)
            .bind(rating.rater_id)
            .bind(rating.ratee_id)
            .bind(rating.score)
            .bind(&rating.review)
            .bind(rating.created_at)
            .execute(&mut *self.tx)
            .await?;
        }

        for event in &changes.events {
            insert_event(&mut self.tx, event).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl LoanUnit for PgUnit {
    fn snapshot(&self) -> &LoanSnapshot {
        &self.snapshot
    }

    async fn commit(self: Box<Self>, changes: LoanChanges) -> Result<(), LendingError> {
        let mut unit = *self;
        if let Err(e) = unit.write(changes).await {
            tracing::error!(loan_id = %unit.snapshot.loan.id, error = %e, "Loan write failed, rolling back");
            return Err(e.into());
        }
        unit.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl LoanStore for PgStore {
    async fn insert_loan(
        &self,
        loan: &LoanRequest,
        event: &LifecycleEvent,
    ) -> Result<(), LendingError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO loan_requests (
                id, borrower_id, lender_id, amount, purpose, duration_days,
                proposed_interest_rate, interest_rate, status, pre_dispute_status,
                created_at, accepted_at, fulfilled_at, completed_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(loan.id)
        .bind(loan.borrower_id)
        .bind(loan.lender_id)
        .bind(loan.amount)
        .bind(&loan.purpose)
        .bind(loan.duration_days)
        .bind(loan.proposed_interest_rate)
        .bind(loan.interest_rate)
        .bind(loan.status)
        .bind(loan.pre_dispute_status)
        .bind(loan.created_at)
        .bind(loan.accepted_at)
        .bind(loan.fulfilled_at)
        .bind(loan.completed_at)
        .bind(loan.updated_at)
        .execute(&mut *tx)
        .await?;

        insert_event(&mut tx, event).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn lock_loan(&self, loan_id: Uuid) -> Result<Box<dyn LoanUnit>, LendingError> {
        let mut tx = self.pool.begin().await?;

        let loan = sqlx::query_as::<_, LoanRequest>(
            "SELECT * FROM loan_requests WHERE id = $1 FOR UPDATE",
        )
        .bind(loan_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| LendingError::not_found("loan", loan_id))?;

        let entries = sqlx::query_as::<_, RepaymentEntry>(
            "SELECT * FROM repayments WHERE loan_request_id = $1 ORDER BY recorded_at, id",
        )
        .bind(loan_id)
        .fetch_all(&mut *tx)
        .await?;

        let disputes = sqlx::query_as::<_, Dispute>(
            "SELECT * FROM disputes WHERE loan_request_id = $1 ORDER BY created_at",
        )
        .bind(loan_id)
        .fetch_all(&mut *tx)
        .await?;

        let ratings = sqlx::query_as::<_, Rating>(
            "SELECT * FROM ratings WHERE loan_request_id = $1 ORDER BY created_at",
        )
        .bind(loan_id)
        .fetch_all(&mut *tx)
        .await?;

        Ok(Box::new(PgUnit {
            tx,
            snapshot: LoanSnapshot {
                loan,
                entries,
                disputes,
                ratings,
            },
        }))
    }

    async fn get_loan(&self, loan_id: Uuid) -> Result<Option<LoanRequest>, LendingError> {
        let loan = sqlx::query_as::<_, LoanRequest>("SELECT * FROM loan_requests WHERE id = $1")
            .bind(loan_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(loan)
    }

    async fn list_loans(
        &self,
        filter: &LoanFilter,
    ) -> Result<PaginatedResponse<LoanRequest>, LendingError> {
        const WHERE: &str = r#"
            WHERE ($1::uuid IS NULL OR borrower_id = $1)
              AND ($2::uuid IS NULL OR lender_id = $2)
              AND ($3::uuid IS NULL OR borrower_id <> $3)
              AND ($4::loan_status IS NULL OR status = $4)
        "#;
        let (_, limit) = filter.pagination.resolve();

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM loan_requests {}", WHERE))
            .bind(filter.borrower_id)
            .bind(filter.lender_id)
            .bind(filter.exclude_borrower_id)
            .bind(filter.status)
            .fetch_one(&self.pool)
            .await?;

        let loans = sqlx::query_as::<_, LoanRequest>(&format!(
            "SELECT * FROM loan_requests {} ORDER BY created_at DESC LIMIT $5 OFFSET $6",
            WHERE
        ))
        .bind(filter.borrower_id)
        .bind(filter.lender_id)
        .bind(filter.exclude_borrower_id)
        .bind(filter.status)
        .bind(limit)
        .bind(filter.pagination.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(PaginatedResponse::new(loans, total, filter.pagination))
    }

    async fn repayments(&self, loan_id: Uuid) -> Result<Vec<RepaymentEntry>, LendingError> {
        let entries = sqlx::query_as::<_, RepaymentEntry>(
            "SELECT * FROM repayments WHERE loan_request_id = $1 ORDER BY recorded_at, id",
        )
        .bind(loan_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    async fn ratings(&self, loan_id: Uuid) -> Result<Vec<Rating>, LendingError> {
        let ratings = sqlx::query_as::<_, Rating>(
            "SELECT * FROM ratings WHERE loan_request_id = $1 ORDER BY created_at",
        )
        .bind(loan_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ratings)
    }

    async fn overdue_candidates(
        &self,
        now: DateTime<Utc>,
        grace_days: i64,
    ) -> Result<Vec<Uuid>, LendingError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM loan_requests
            WHERE status = 'in_progress'
              AND fulfilled_at IS NOT NULL
              AND fulfilled_at + make_interval(days => duration_days + $2::int) < $1
            "#,
        )
        .bind(now)
        .bind(grace_days)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn get_dispute(&self, dispute_id: Uuid) -> Result<Option<Dispute>, LendingError> {
        let dispute = sqlx::query_as::<_, Dispute>("SELECT * FROM disputes WHERE id = $1")
            .bind(dispute_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(mut dispute) = dispute else {
            return Ok(None);
        };

        dispute.notes = sqlx::query_as::<_, DisputeNote>(
            "SELECT * FROM dispute_notes WHERE dispute_id = $1 ORDER BY created_at, id",
        )
        .bind(dispute_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(dispute))
    }

    async fn list_disputes(&self, filter: &DisputeFilter) -> Result<Vec<Dispute>, LendingError> {
        let disputes = sqlx::query_as::<_, Dispute>(
            r#"
            SELECT * FROM disputes
            WHERE ($1::dispute_status IS NULL OR status = $1)
              AND ($2::uuid IS NULL OR loan_request_id = $2)
              AND ($3::uuid IS NULL OR raised_by = $3 OR against_user_id = $3)
            ORDER BY created_at DESC
            "#,
        )
        .bind(filter.status)
        .bind(filter.loan_request_id)
        .bind(filter.involving)
        .fetch_all(&self.pool)
        .await?;
        Ok(disputes)
    }

    async fn open_disputes_for(&self, loan_id: Uuid) -> Result<Vec<Dispute>, LendingError> {
        let disputes = sqlx::query_as::<_, Dispute>(
            r#"
            SELECT * FROM disputes
            WHERE loan_request_id = $1 AND status IN ('open', 'under_review')
            ORDER BY created_at
            "#,
        )
        .bind(loan_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(disputes)
    }

    async fn insert_report(&self, report: &Report) -> Result<(), LendingError> {
        sqlx::query(
            r#"
            INSERT INTO reports (
                id, reporter_id, reported_user_id, loan_request_id, report_type,
                description, status, resolution, resolved_by, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(report.id)
        .bind(report.reporter_id)
        .bind(report.reported_user_id)
        .bind(report.loan_request_id)
        .bind(report.report_type)
        .bind(&report.description)
        .bind(report.status)
        .bind(&report.resolution)
        .bind(report.resolved_by)
        .bind(report.created_at)
        .bind(report.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_report(
        &self,
        report: &Report,
        expected: ReportStatus,
        block_user: Option<Uuid>,
    ) -> Result<bool, LendingError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE reports
            SET status = $2, resolution = $3, resolved_by = $4, updated_at = $5
            WHERE id = $1 AND status = $6
            "#,
        )
        .bind(report.id)
        .bind(report.status)
        .bind(&report.resolution)
        .bind(report.resolved_by)
        .bind(report.updated_at)
        .bind(expected)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            drop(tx);
            return match self.get_report(report.id).await? {
                Some(_) => Ok(false),
                None => Err(LendingError::not_found("report", report.id)),
            };
        }

        if let Some(user_id) = block_user {
            let blocked = sqlx::query(
                "UPDATE users SET is_blocked = TRUE, updated_at = NOW() WHERE id = $1",
            )
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
            if blocked.rows_affected() != 1 {
                return Err(LendingError::not_found("user", user_id));
            }
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn get_report(&self, report_id: Uuid) -> Result<Option<Report>, LendingError> {
        let report = sqlx::query_as::<_, Report>("SELECT * FROM reports WHERE id = $1")
            .bind(report_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(report)
    }

    async fn list_reports(
        &self,
        filter: &ReportFilter,
    ) -> Result<PaginatedResponse<Report>, LendingError> {
        const WHERE: &str = r#"
            WHERE ($1::report_status IS NULL OR status = $1)
              AND ($2::uuid IS NULL OR reporter_id = $2)
        "#;
        let pagination = filter.pagination();
        let (_, limit) = pagination.resolve();

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM reports {}", WHERE))
            .bind(filter.status)
            .bind(filter.reporter_id)
            .fetch_one(&self.pool)
            .await?;

        let reports = sqlx::query_as::<_, Report>(&format!(
            "SELECT * FROM reports {} ORDER BY created_at DESC LIMIT $3 OFFSET $4",
            WHERE
        ))
        .bind(filter.status)
        .bind(filter.reporter_id)
        .bind(limit)
        .bind(pagination.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(PaginatedResponse::new(reports, total, pagination))
    }

    async fn activity(&self, loan_id: Uuid) -> Result<Vec<LifecycleEvent>, LendingError> {
        let rows = sqlx::query_as::<_, ActivityRow>(
            "SELECT * FROM activity_logs WHERE loan_request_id = $1 ORDER BY occurred_at, id",
        )
        .bind(loan_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(LifecycleEvent::try_from).collect()
    }
}

#[async_trait]
impl VerificationGate for PgStore {
    async fn verification_status(
        &self,
        user_id: Uuid,
    ) -> Result<Option<VerificationStatus>, LendingError> {
        let status = sqlx::query_as::<_, VerificationStatus>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            VERIFICATION_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(status)
    }
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn set_verification(
        &self,
        user_id: Uuid,
        state: VerificationState,
    ) -> Result<VerificationStatus, LendingError> {
        sqlx::query_as::<_, VerificationStatus>(&format!(
            "UPDATE users SET verification_status = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            VERIFICATION_COLUMNS
        ))
        .bind(user_id)
        .bind(state)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| LendingError::not_found("user", user_id))
    }

    async fn set_blocked(
        &self,
        user_id: Uuid,
        blocked: bool,
    ) -> Result<VerificationStatus, LendingError> {
        sqlx::query_as::<_, VerificationStatus>(&format!(
            "UPDATE users SET is_blocked = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            VERIFICATION_COLUMNS
        ))
        .bind(user_id)
        .bind(blocked)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| LendingError::not_found("user", user_id))
    }
}
