//! Administrator override handlers

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::dispute::{
    Dispute, DisputeFilter, Report, ReportFilter, ReportService, ResolveDisputeRequest,
    UpdateReportRequest,
};
use super::optional_body;
use crate::error::ApiError;
use crate::loan::{LoanEngine, LoanRequest, RejectLoanRequest};
use crate::middleware::AdminUser;
use crate::models::{ApiResponse, PaginatedResponse};
use crate::verification::{SetBlockedRequest, SetVerificationRequest, VerificationStatus};

pub async fn reject_loan(
    State(engine): State<Arc<LoanEngine>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    request: Result<Json<RejectLoanRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<LoanRequest>>, ApiError> {
    let request = optional_body(request)?;
    let loan = engine.reject_loan(admin.actor(), id, request).await?;
    Ok(Json(ApiResponse::ok(loan)))
}

pub async fn default_loan(
    State(engine): State<Arc<LoanEngine>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<LoanRequest>>, ApiError> {
    let loan = engine.default_loan(admin.actor(), id).await?;
    Ok(Json(ApiResponse::ok(loan)))
}

pub async fn list_disputes(
    State(engine): State<Arc<LoanEngine>>,
    AdminUser(admin): AdminUser,
    Query(filter): Query<DisputeFilter>,
) -> Result<Json<ApiResponse<Vec<Dispute>>>, ApiError> {
    let disputes = engine.list_disputes(admin.actor(), filter).await?;
    Ok(Json(ApiResponse::ok(disputes)))
}

pub async fn resolve_dispute(
    State(engine): State<Arc<LoanEngine>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(request): Json<ResolveDisputeRequest>,
) -> Result<Json<ApiResponse<Dispute>>, ApiError> {
    let dispute = engine.resolve_dispute(admin.actor(), id, request).await?;
    Ok(Json(ApiResponse::ok(dispute)))
}

pub async fn list_reports(
    State(service): State<Arc<ReportService>>,
    AdminUser(admin): AdminUser,
    Query(filter): Query<ReportFilter>,
) -> Result<Json<ApiResponse<PaginatedResponse<Report>>>, ApiError> {
    let reports = service.list_reports(admin.actor(), filter).await?;
    Ok(Json(ApiResponse::ok(reports)))
}

pub async fn update_report(
    State(service): State<Arc<ReportService>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateReportRequest>,
) -> Result<Json<ApiResponse<Report>>, ApiError> {
    let report = service.update_report(admin.actor(), id, request).await?;
    Ok(Json(ApiResponse::ok(report)))
}

pub async fn set_user_verification(
    State(engine): State<Arc<LoanEngine>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(request): Json<SetVerificationRequest>,
) -> Result<Json<ApiResponse<VerificationStatus>>, ApiError> {
    let status = engine
        .set_user_verification(admin.actor(), id, request.status)
        .await?;
    Ok(Json(ApiResponse::ok(status)))
}

pub async fn set_user_blocked(
    State(engine): State<Arc<LoanEngine>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(request): Json<SetBlockedRequest>,
) -> Result<Json<ApiResponse<VerificationStatus>>, ApiError> {
    let status = engine
        .set_user_blocked(admin.actor(), id, request.blocked)
        .await?;
    Ok(Json(ApiResponse::ok(status)))
}

/// Run the overdue sweep now instead of waiting for the schedule
pub async fn run_overdue_sweep(
    State(engine): State<Arc<LoanEngine>>,
    AdminUser(admin): AdminUser,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let summary = engine.sweep_overdue(sqlx::types::chrono::Utc::now()).await?;
    tracing::info!(admin_id = %admin.user_id, defaulted = summary.defaulted.len(), "Manual overdue sweep");
    Ok(Json(ApiResponse::ok(serde_json::json!({
        "examined": summary.examined,
        "defaulted": summary.defaulted,
        "skipped": summary.skipped,
        "failed": summary.failed,
    }))))
}
