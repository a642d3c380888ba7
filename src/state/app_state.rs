//! Application state shared across handlers

use std::sync::Arc;

use crate::auth::AuthService;
use crate::db::Database;
use crate::dispute::ReportService;
use crate::loan::LoanEngine;
use crate::websocket::WsState;

use axum::extract::FromRef;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub loan_engine: Arc<LoanEngine>,
    pub report_service: Arc<ReportService>,
    pub auth_service: Arc<AuthService>,
    pub ws_state: WsState,
    /// Absent when running on the in-memory store
    pub database: Option<Database>,
}

impl AppState {
    pub fn new(
        loan_engine: Arc<LoanEngine>,
        report_service: Arc<ReportService>,
        auth_service: Arc<AuthService>,
        ws_state: WsState,
        database: Option<Database>,
    ) -> Self {
        Self {
            loan_engine,
            report_service,
            auth_service,
            ws_state,
            database,
        }
    }
}

impl FromRef<AppState> for WsState {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.ws_state.clone()
    }
}

impl FromRef<AppState> for Arc<LoanEngine> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.loan_engine.clone()
    }
}

impl FromRef<AppState> for Arc<ReportService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.report_service.clone()
    }
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.auth_service.clone()
    }
}
