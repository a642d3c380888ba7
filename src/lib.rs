//! Microlend backend library
//!
//! Peer-to-peer micro-loan lifecycle: the loan state machine, the repayment
//! ledger, dispute interlocks and the HTTP surface around them.

pub mod auth;
pub mod config;
pub mod db;
pub mod dispute;
pub mod error;
pub mod events;
pub mod handlers;
pub mod loan;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod store;
pub mod verification;
pub mod websocket;

use axum::{routing::get, Router};

use state::AppState;

/// Assemble every route onto `state`
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ws", get(websocket::ws_handler))
        .merge(routes::loan_routes())
        .merge(routes::dispute_routes())
        .merge(routes::report_routes())
        .merge(routes::admin_routes())
        .with_state(state)
        .layer(axum::middleware::from_fn(middleware::request_tracing))
}
