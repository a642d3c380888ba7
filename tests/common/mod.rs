//! Shared fixtures for integration tests

#![allow(dead_code)]

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use uuid::Uuid;

use microlend_server::dispute::ReportService;
use microlend_server::events::EventBus;
use microlend_server::loan::{
    AcceptLoanRequest, CreateLoanRequest, LendingPolicy, LoanEngine, LoanRequest, PaymentMethod,
    RecordRepaymentRequest,
};
use microlend_server::models::{Actor, UserRole};
use microlend_server::store::MemoryStore;
use microlend_server::verification::VerificationState;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub engine: LoanEngine,
    pub reports: ReportService,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let engine = LoanEngine::new(
            store.clone(),
            store.clone(),
            EventBus::default(),
            LendingPolicy::default(),
        );
        let reports = ReportService::new(store.clone(), store.clone());
        Self {
            store,
            engine,
            reports,
        }
    }

    /// A verified, unblocked user
    pub async fn user(&self, role: UserRole) -> Actor {
        self.user_with(role, VerificationState::Approved, false)
            .await
    }

    pub async fn user_with(
        &self,
        role: UserRole,
        state: VerificationState,
        blocked: bool,
    ) -> Actor {
        let user_id = Uuid::new_v4();
        self.store.upsert_user(user_id, state, blocked).await;
        Actor::new(user_id, role)
    }

    pub fn admin(&self) -> Actor {
        Actor::new(Uuid::new_v4(), UserRole::Admin)
    }

    pub async fn pending_loan(&self, borrower: Actor, amount: Decimal) -> LoanRequest {
        self.engine
            .create_loan(borrower, loan_request(amount))
            .await
            .expect("create loan")
    }

    pub async fn accepted_loan(&self, borrower: Actor, lender: Actor, amount: Decimal) -> LoanRequest {
        let loan = self.pending_loan(borrower, amount).await;
        self.engine
            .accept_loan(lender, loan.id, AcceptLoanRequest::default())
            .await
            .expect("accept loan")
    }

    /// Created, accepted at the default 10% and fulfilled
    pub async fn fulfilled_loan(&self, borrower: Actor, lender: Actor, amount: Decimal) -> LoanRequest {
        let loan = self.accepted_loan(borrower, lender, amount).await;
        self.engine
            .fulfill_loan(lender, loan.id)
            .await
            .expect("fulfill loan")
    }
}

pub fn loan_request(amount: Decimal) -> CreateLoanRequest {
    CreateLoanRequest {
        amount,
        purpose: "Sewing machine for tailoring shop".to_string(),
        duration_days: 30,
        interest_rate: None,
    }
}

pub fn repayment(amount: Decimal) -> RecordRepaymentRequest {
    RecordRepaymentRequest {
        amount,
        payment_method: PaymentMethod::BankTransfer,
        transaction_reference: Some("TXN-001".to_string()),
        remarks: None,
    }
}

pub const PRINCIPAL: Decimal = dec!(10000);
