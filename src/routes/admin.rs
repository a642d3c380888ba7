//! Administrator route definitions

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::handlers::admin::*;
use crate::state::AppState;

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/api/admin/loans/:id/reject", post(reject_loan))
        .route("/api/admin/loans/:id/default", post(default_loan))
        .route("/api/admin/disputes", get(list_disputes))
        .route("/api/admin/disputes/:id", put(resolve_dispute))
        .route("/api/admin/reports", get(list_reports))
        .route("/api/admin/reports/:id", put(update_report))
        .route("/api/admin/users/:id/verification", put(set_user_verification))
        .route("/api/admin/users/:id/block", put(set_user_blocked))
        .route("/api/admin/sweep", post(run_overdue_sweep))
}
