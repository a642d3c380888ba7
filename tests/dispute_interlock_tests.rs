//! Dispute freezing, resolution and reports

mod common;

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use chrono::{Duration, Utc};

    use microlend_server::dispute::{
        AddDisputeNoteRequest, DisputeFilter, DisputeOutcome, DisputeStatus, DisputeType,
        FileDisputeRequest, FileReportRequest, Report, ReportFilter, ReportStatus, ReportType,
        ResolveDisputeRequest, UpdateReportRequest,
    };
    use microlend_server::error::LendingError;
    use microlend_server::loan::{AcceptLoanRequest, Initiator, LoanRequest, LoanStatus};
    use microlend_server::models::{Actor, UserRole};
    use microlend_server::store::LoanStore;
    use uuid::Uuid;

    use crate::common::{repayment, Harness, PRINCIPAL};

    fn dispute_against(loan: &LoanRequest, against: Actor) -> FileDisputeRequest {
        FileDisputeRequest {
            loan_request_id: loan.id,
            against_user_id: against.user_id,
            dispute_type: DisputeType::PaymentNotReceived,
            description: "Funds never arrived".to_string(),
            disputed_amount: Some(dec!(10000)),
        }
    }

    fn settle(outcome: DisputeOutcome) -> ResolveDisputeRequest {
        ResolveDisputeRequest {
            status: DisputeStatus::Resolved,
            resolution: Some("Reviewed bank statements".to_string()),
            outcome,
        }
    }

    #[tokio::test]
    async fn test_dispute_freezes_and_continue_resumes() {
        let h = Harness::new();
        let borrower = h.user(UserRole::Borrower).await;
        let lender = h.user(UserRole::Lender).await;
        let admin = h.admin();
        let loan = h.accepted_loan(borrower, lender, PRINCIPAL).await;

        let dispute = h
            .engine
            .file_dispute(borrower, dispute_against(&loan, lender))
            .await
            .unwrap();
        assert_eq!(dispute.status, DisputeStatus::Open);

        let frozen = h.engine.get_loan(borrower, loan.id).await.unwrap();
        assert_eq!(frozen.status, LoanStatus::Disputed);
        assert_eq!(frozen.pre_dispute_status, Some(LoanStatus::Accepted));

        let err = h.engine.fulfill_loan(lender, loan.id).await.unwrap_err();
        assert_eq!(err, LendingError::LoanDisputed(loan.id));

        let reviewed = h
            .engine
            .resolve_dispute(
                admin,
                dispute.id,
                ResolveDisputeRequest {
                    status: DisputeStatus::UnderReview,
                    resolution: None,
                    outcome: DisputeOutcome::Continue,
                },
            )
            .await
            .unwrap();
        assert_eq!(reviewed.status, DisputeStatus::UnderReview);
        let err = h.engine.fulfill_loan(lender, loan.id).await.unwrap_err();
        assert_eq!(err, LendingError::LoanDisputed(loan.id));

        let resolved = h
            .engine
            .resolve_dispute(admin, dispute.id, settle(DisputeOutcome::Continue))
            .await
            .unwrap();
        assert_eq!(resolved.status, DisputeStatus::Resolved);
        assert_eq!(resolved.resolved_by, Some(admin.user_id));

        let resumed = h.engine.get_loan(borrower, loan.id).await.unwrap();
        assert_eq!(resumed.status, LoanStatus::Accepted);
        assert_eq!(resumed.pre_dispute_status, None);

        let fulfilled = h.engine.fulfill_loan(lender, loan.id).await.unwrap();
        assert_eq!(fulfilled.status, LoanStatus::Fulfilled);
    }

    #[tokio::test]
    async fn test_repayment_refused_while_disputed() {
        let h = Harness::new();
        let borrower = h.user(UserRole::Borrower).await;
        let lender = h.user(UserRole::Lender).await;
        let loan = h.fulfilled_loan(borrower, lender, PRINCIPAL).await;
        h.engine
            .record_repayment(lender, loan.id, repayment(dec!(1000)))
            .await
            .unwrap();

        h.engine
            .file_dispute(lender, dispute_against(&loan, borrower))
            .await
            .unwrap();

        let err = h
            .engine
            .record_repayment(lender, loan.id, repayment(dec!(1000)))
            .await
            .unwrap_err();
        assert_eq!(err, LendingError::LoanDisputed(loan.id));
        assert_eq!(h.engine.repayments(lender, loan.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_second_dispute_keeps_loan_frozen() {
        let h = Harness::new();
        let borrower = h.user(UserRole::Borrower).await;
        let lender = h.user(UserRole::Lender).await;
        let admin = h.admin();
        let loan = h.fulfilled_loan(borrower, lender, PRINCIPAL).await;

        let first = h
            .engine
            .file_dispute(borrower, dispute_against(&loan, lender))
            .await
            .unwrap();
        let second = h
            .engine
            .file_dispute(lender, dispute_against(&loan, borrower))
            .await
            .unwrap();

        assert_eq!(h.engine.open_disputes_for(loan.id).await.unwrap().len(), 2);

        h.engine
            .resolve_dispute(admin, first.id, settle(DisputeOutcome::Continue))
            .await
            .unwrap();
        assert_eq!(h.engine.open_disputes_for(loan.id).await.unwrap().len(), 1);
        let still = h.engine.get_loan(borrower, loan.id).await.unwrap();
        assert_eq!(still.status, LoanStatus::Disputed);

        h.engine
            .resolve_dispute(admin, second.id, settle(DisputeOutcome::Continue))
            .await
            .unwrap();
        let resumed = h.engine.get_loan(borrower, loan.id).await.unwrap();
        assert_eq!(resumed.status, LoanStatus::Fulfilled);

        let opened = h
            .engine
            .activity(borrower, loan.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|event| event.to_status == LoanStatus::Disputed)
            .count();
        assert_eq!(opened, 1);
    }

    #[tokio::test]
    async fn test_dispute_rulings_end_the_loan() {
        let h = Harness::new();
        let borrower = h.user(UserRole::Borrower).await;
        let lender = h.user(UserRole::Lender).await;
        let admin = h.admin();

        let loan = h.fulfilled_loan(borrower, lender, PRINCIPAL).await;
        let dispute = h
            .engine
            .file_dispute(borrower, dispute_against(&loan, lender))
            .await
            .unwrap();
        h.engine
            .resolve_dispute(admin, dispute.id, settle(DisputeOutcome::Default))
            .await
            .unwrap();
        let defaulted = h.engine.get_loan(admin, loan.id).await.unwrap();
        assert_eq!(defaulted.status, LoanStatus::Defaulted);
        let last = h.engine.activity(admin, loan.id).await.unwrap().pop().unwrap();
        assert_eq!(last.actor, Initiator::Admin(admin.user_id));

        let loan = h.accepted_loan(borrower, lender, PRINCIPAL).await;
        let dispute = h
            .engine
            .file_dispute(lender, dispute_against(&loan, borrower))
            .await
            .unwrap();
        h.engine
            .resolve_dispute(admin, dispute.id, settle(DisputeOutcome::Cancel))
            .await
            .unwrap();
        let cancelled = h.engine.get_loan(admin, loan.id).await.unwrap();
        assert_eq!(cancelled.status, LoanStatus::Cancelled);
        assert_eq!(cancelled.lender_id, None);
    }

    #[tokio::test]
    async fn test_dispute_rules() {
        let h = Harness::new();
        let borrower = h.user(UserRole::Borrower).await;
        let lender = h.user(UserRole::Lender).await;
        let outsider = h.user(UserRole::Lender).await;
        let admin = h.admin();

        let pending = h.pending_loan(borrower, PRINCIPAL).await;
        let mut request = dispute_against(&pending, lender);
        let err = h.engine.file_dispute(borrower, request.clone()).await.unwrap_err();
        assert!(matches!(err, LendingError::Validation(_)));

        let loan = h.accepted_loan(borrower, lender, PRINCIPAL).await;
        request = dispute_against(&loan, lender);
        let err = h.engine.file_dispute(outsider, request.clone()).await.unwrap_err();
        assert!(matches!(err, LendingError::Forbidden(_)));

        let dispute = h.engine.file_dispute(borrower, request).await.unwrap();

        let err = h
            .engine
            .resolve_dispute(borrower, dispute.id, settle(DisputeOutcome::Continue))
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::Forbidden(_)));

        h.engine
            .resolve_dispute(admin, dispute.id, settle(DisputeOutcome::Continue))
            .await
            .unwrap();
        let err = h
            .engine
            .resolve_dispute(admin, dispute.id, settle(DisputeOutcome::Default))
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_dispute_refused_after_completion() {
        let h = Harness::new();
        let borrower = h.user(UserRole::Borrower).await;
        let lender = h.user(UserRole::Lender).await;
        let loan = h.pending_loan(borrower, PRINCIPAL).await;
        h.engine
            .accept_loan(lender, loan.id, AcceptLoanRequest::default())
            .await
            .unwrap();
        h.engine.fulfill_loan(lender, loan.id).await.unwrap();
        h.engine
            .record_repayment(lender, loan.id, repayment(dec!(11000)))
            .await
            .unwrap();

        let err = h
            .engine
            .file_dispute(borrower, dispute_against(&loan, lender))
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn test_notes_until_settled() {
        let h = Harness::new();
        let borrower = h.user(UserRole::Borrower).await;
        let lender = h.user(UserRole::Lender).await;
        let outsider = h.user(UserRole::Borrower).await;
        let admin = h.admin();
        let loan = h.fulfilled_loan(borrower, lender, PRINCIPAL).await;
        let dispute = h
            .engine
            .file_dispute(borrower, dispute_against(&loan, lender))
            .await
            .unwrap();

        let note = |text: &str| AddDisputeNoteRequest {
            text: text.to_string(),
            evidence: Some("uploads/receipt-118.pdf".to_string()),
        };
        h.engine
            .add_dispute_note(lender, dispute.id, note("Sent via bank transfer"))
            .await
            .unwrap();
        h.engine
            .add_dispute_note(admin, dispute.id, note("Requesting statements"))
            .await
            .unwrap();
        let err = h
            .engine
            .add_dispute_note(outsider, dispute.id, note("Hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::Forbidden(_)));

        let fetched = h.engine.get_dispute(borrower, dispute.id).await.unwrap();
        assert_eq!(fetched.notes.len(), 2);

        h.engine
            .resolve_dispute(
                admin,
                dispute.id,
                ResolveDisputeRequest {
                    status: DisputeStatus::Closed,
                    resolution: None,
                    outcome: DisputeOutcome::Continue,
                },
            )
            .await
            .unwrap();
        let err = h
            .engine
            .add_dispute_note(borrower, dispute.id, note("One more thing"))
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_dispute_listing_scoped_to_parties() {
        let h = Harness::new();
        let borrower = h.user(UserRole::Borrower).await;
        let lender = h.user(UserRole::Lender).await;
        let outsider = h.user(UserRole::Lender).await;
        let loan = h.fulfilled_loan(borrower, lender, PRINCIPAL).await;
        h.engine
            .file_dispute(borrower, dispute_against(&loan, lender))
            .await
            .unwrap();

        let theirs = h
            .engine
            .list_disputes(lender, DisputeFilter::default())
            .await
            .unwrap();
        assert_eq!(theirs.len(), 1);
        let none = h
            .engine
            .list_disputes(outsider, DisputeFilter::default())
            .await
            .unwrap();
        assert!(none.is_empty());
        let open = h
            .engine
            .list_disputes(
                h.admin(),
                DisputeFilter {
                    status: Some(DisputeStatus::Open),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(open.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_skips_disputed_loans() {
        let h = Harness::new();
        let borrower = h.user(UserRole::Borrower).await;
        let lender = h.user(UserRole::Lender).await;
        let admin = h.admin();
        let loan = h.fulfilled_loan(borrower, lender, PRINCIPAL).await;
        h.engine
            .record_repayment(lender, loan.id, repayment(dec!(500)))
            .await
            .unwrap();
        let dispute = h
            .engine
            .file_dispute(borrower, dispute_against(&loan, lender))
            .await
            .unwrap();

        let late = Utc::now() + Duration::days(60);
        let summary = h.engine.sweep_overdue(late).await.unwrap();
        assert!(summary.defaulted.is_empty());
        assert_eq!(
            h.engine.get_loan(admin, loan.id).await.unwrap().status,
            LoanStatus::Disputed
        );

        h.engine
            .resolve_dispute(admin, dispute.id, settle(DisputeOutcome::Continue))
            .await
            .unwrap();
        let summary = h.engine.sweep_overdue(late).await.unwrap();
        assert_eq!(summary.defaulted, vec![loan.id]);
    }

    #[tokio::test]
    async fn test_report_does_not_freeze_and_can_block() {
        let h = Harness::new();
        let borrower = h.user(UserRole::Borrower).await;
        let lender = h.user(UserRole::Lender).await;
        let admin = h.admin();
        let loan = h.accepted_loan(borrower, lender, PRINCIPAL).await;

        let report = h
            .reports
            .file_report(
                borrower,
                FileReportRequest {
                    reported_user_id: lender.user_id,
                    loan_request_id: Some(loan.id),
                    report_type: ReportType::Harassment,
                    description: "Repeated calls at night".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(report.status, ReportStatus::Pending);

        let fulfilled = h.engine.fulfill_loan(lender, loan.id).await.unwrap();
        assert_eq!(fulfilled.status, LoanStatus::Fulfilled);

        let err = h
            .reports
            .update_report(
                borrower,
                report.id,
                UpdateReportRequest {
                    status: ReportStatus::Resolved,
                    resolution: None,
                    block_user: true,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::Forbidden(_)));

        let resolved = h
            .reports
            .update_report(
                admin,
                report.id,
                UpdateReportRequest {
                    status: ReportStatus::Resolved,
                    resolution: Some("Confirmed from call logs".to_string()),
                    block_user: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(resolved.resolved_by, Some(admin.user_id));

        let other = h.pending_loan(borrower, PRINCIPAL).await;
        let err = h
            .engine
            .accept_loan(lender, other.id, AcceptLoanRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err, LendingError::UserBlocked(lender.user_id));

        let err = h
            .reports
            .update_report(
                admin,
                report.id,
                UpdateReportRequest {
                    status: ReportStatus::Dismissed,
                    resolution: None,
                    block_user: false,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_failed_block_leaves_report_pending() {
        let h = Harness::new();
        let reporter = h.user(UserRole::Borrower).await;
        let admin = h.admin();
        let now = Utc::now();
        let report = Report {
            id: Uuid::new_v4(),
            reporter_id: reporter.user_id,
            reported_user_id: Uuid::new_v4(),
            loan_request_id: None,
            report_type: ReportType::Fraud,
            description: "Account no longer on record".to_string(),
            status: ReportStatus::Pending,
            resolution: None,
            resolved_by: None,
            created_at: now,
            updated_at: now,
        };
        h.store.insert_report(&report).await.unwrap();

        let err = h
            .reports
            .update_report(
                admin,
                report.id,
                UpdateReportRequest {
                    status: ReportStatus::Resolved,
                    resolution: Some("Confirmed".to_string()),
                    block_user: true,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::NotFound { entity: "user", .. }));

        let stored = h.reports.get_report(admin, report.id).await.unwrap();
        assert_eq!(stored.status, ReportStatus::Pending);
        assert_eq!(stored.resolution, None);
        assert_eq!(stored.resolved_by, None);
    }

    #[tokio::test]
    async fn test_report_validation_and_listing() {
        let h = Harness::new();
        let borrower = h.user(UserRole::Borrower).await;
        let lender = h.user(UserRole::Lender).await;

        let err = h
            .reports
            .file_report(
                borrower,
                FileReportRequest {
                    reported_user_id: borrower.user_id,
                    loan_request_id: None,
                    report_type: ReportType::Other,
                    description: "Myself".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::Validation(_)));

        for _ in 0..3 {
            h.reports
                .file_report(
                    borrower,
                    FileReportRequest {
                        reported_user_id: lender.user_id,
                        loan_request_id: None,
                        report_type: ReportType::FalseInformation,
                        description: "Profile details do not match".to_string(),
                    },
                )
                .await
                .unwrap();
        }

        let mine = h
            .reports
            .my_reports(lender, ReportFilter::default())
            .await
            .unwrap();
        assert_eq!(mine.total, 0);

        let page = h
            .reports
            .list_reports(
                h.admin(),
                ReportFilter {
                    limit: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.data.len(), 2);
    }
}
