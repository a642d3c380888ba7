//! Dispute and report handlers for loan parties

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::dispute::{
    AddDisputeNoteRequest, Dispute, DisputeFilter, DisputeNote, FileDisputeRequest,
    FileReportRequest, Report, ReportFilter, ReportService,
};
use crate::error::ApiError;
use crate::loan::LoanEngine;
use crate::middleware::AuthenticatedUser;
use crate::models::{ApiResponse, PaginatedResponse};

pub async fn file_dispute(
    State(engine): State<Arc<LoanEngine>>,
    user: AuthenticatedUser,
    Json(request): Json<FileDisputeRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Dispute>>), ApiError> {
    let dispute = engine.file_dispute(user.actor(), request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(dispute))))
}

/// Disputes raised by or against the caller
pub async fn my_disputes(
    State(engine): State<Arc<LoanEngine>>,
    user: AuthenticatedUser,
    Query(filter): Query<DisputeFilter>,
) -> Result<Json<ApiResponse<Vec<Dispute>>>, ApiError> {
    let actor = user.actor();
    let disputes = engine
        .list_disputes(actor, filter)
        .await?
        .into_iter()
        .filter(|dispute| dispute.involves(actor.user_id))
        .collect();
    Ok(Json(ApiResponse::ok(disputes)))
}

pub async fn get_dispute(
    State(engine): State<Arc<LoanEngine>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Dispute>>, ApiError> {
    let dispute = engine.get_dispute(user.actor(), id).await?;
    Ok(Json(ApiResponse::ok(dispute)))
}

pub async fn add_dispute_note(
    State(engine): State<Arc<LoanEngine>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(request): Json<AddDisputeNoteRequest>,
) -> Result<(StatusCode, Json<ApiResponse<DisputeNote>>), ApiError> {
    let note = engine.add_dispute_note(user.actor(), id, request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(note))))
}

pub async fn file_report(
    State(service): State<Arc<ReportService>>,
    user: AuthenticatedUser,
    Json(request): Json<FileReportRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Report>>), ApiError> {
    let report = service.file_report(user.actor(), request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(report))))
}

pub async fn my_reports(
    State(service): State<Arc<ReportService>>,
    user: AuthenticatedUser,
    Query(filter): Query<ReportFilter>,
) -> Result<Json<ApiResponse<PaginatedResponse<Report>>>, ApiError> {
    let reports = service.my_reports(user.actor(), filter).await?;
    Ok(Json(ApiResponse::ok(reports)))
}

pub async fn get_report(
    State(service): State<Arc<ReportService>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Report>>, ApiError> {
    let report = service.get_report(user.actor(), id).await?;
    Ok(Json(ApiResponse::ok(report)))
}
