//! Loan route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::loan::*;
use crate::state::AppState;

pub fn loan_routes() -> Router<AppState> {
    Router::new()
        .route("/api/loans", post(create_loan).get(list_loans))
        .route("/api/loans/pending", get(list_pending_loans))
        .route("/api/loans/:id", get(get_loan).put(update_loan))
        .route("/api/loans/:id/accept", post(accept_loan))
        .route("/api/loans/:id/cancel", post(cancel_loan))
        .route("/api/loans/:id/fulfill", post(fulfill_loan))
        .route(
            "/api/loans/:id/repayments",
            get(list_repayments).post(record_repayment),
        )
        .route("/api/loans/:id/repayment", post(record_repayment))
        .route("/api/loans/:id/balance", get(get_balance))
        .route("/api/loans/:id/rate", post(rate_loan))
        .route("/api/loans/:id/ratings", get(list_ratings))
        .route("/api/loans/:id/activity", get(loan_activity))
}
