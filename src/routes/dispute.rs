//! Dispute route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::dispute::{add_dispute_note, file_dispute, get_dispute, my_disputes};
use crate::state::AppState;

pub fn dispute_routes() -> Router<AppState> {
    Router::new()
        .route("/api/disputes", post(file_dispute).get(my_disputes))
        .route("/api/disputes/:id", get(get_dispute))
        .route("/api/disputes/:id/notes", post(add_dispute_note))
}
