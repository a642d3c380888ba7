//! API handlers
//!
//! Thin adapters from HTTP onto [`crate::loan::LoanEngine`] and
//! [`crate::dispute::ReportService`].

pub mod admin;
pub mod dispute;
pub mod loan;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use serde_json::json;

use crate::error::ApiError;
use crate::state::AppState;

/// Optional JSON body: no body means defaults, a malformed one is a 400
pub(crate) fn optional_body<T: Default>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(T::default()),
        Err(rejection) => Err(ApiError::BadRequest(rejection.body_text())),
    }
}

/// Liveness plus database reachability
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let (database, latency_ms) = match &state.database {
        Some(db) => match db.ping().await {
            Ok(latency) => ("healthy", Some(latency.as_millis() as u64)),
            Err(e) => {
                tracing::error!(error = %e, "Health check could not reach the database");
                ("unhealthy", None)
            }
        },
        None => ("not_configured", None),
    };
    let status = if database == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (
        status,
        Json(json!({
            "status": if status.is_success() { "healthy" } else { "degraded" },
            "database": database,
            "database_latency_ms": latency_ms,
            "websocket_clients": state.ws_state.client_count().await,
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}
