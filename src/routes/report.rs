//! Report route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::dispute::{file_report, get_report, my_reports};
use crate::state::AppState;

pub fn report_routes() -> Router<AppState> {
    Router::new()
        .route("/api/reports", post(file_report))
        .route("/api/reports/mine", get(my_reports))
        .route("/api/reports/:id", get(get_report))
}
