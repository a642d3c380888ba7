//! Loan and repayment handlers

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::optional_body;
use crate::error::ApiError;
use crate::events::LifecycleEvent;
use crate::loan::{
    AcceptLoanRequest, BalanceSummary, CreateLoanRequest, ListLoansQuery, LoanEngine,
    LoanRequest, RateLoanRequest, Rating, RecordRepaymentRequest, RepaymentEntry,
    RepaymentReceipt, UpdateLoanRequest,
};
use crate::middleware::AuthenticatedUser;
use crate::models::{ApiResponse, PaginatedResponse, PaginationParams};

pub async fn create_loan(
    State(engine): State<Arc<LoanEngine>>,
    user: AuthenticatedUser,
    Json(request): Json<CreateLoanRequest>,
) -> Result<(StatusCode, Json<ApiResponse<LoanRequest>>), ApiError> {
    let loan = engine.create_loan(user.actor(), request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(loan))))
}

pub async fn list_loans(
    State(engine): State<Arc<LoanEngine>>,
    user: AuthenticatedUser,
    Query(query): Query<ListLoansQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<LoanRequest>>>, ApiError> {
    let loans = engine.list_loans(user.actor(), query).await?;
    Ok(Json(ApiResponse::ok(loans)))
}

/// Marketplace listing of open requests
pub async fn list_pending_loans(
    State(engine): State<Arc<LoanEngine>>,
    user: AuthenticatedUser,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PaginatedResponse<LoanRequest>>>, ApiError> {
    let loans = engine.list_pending(user.actor(), pagination).await?;
    Ok(Json(ApiResponse::ok(loans)))
}

pub async fn get_loan(
    State(engine): State<Arc<LoanEngine>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<LoanRequest>>, ApiError> {
    let loan = engine.get_loan(user.actor(), id).await?;
    Ok(Json(ApiResponse::ok(loan)))
}

pub async fn update_loan(
    State(engine): State<Arc<LoanEngine>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateLoanRequest>,
) -> Result<Json<ApiResponse<LoanRequest>>, ApiError> {
    let loan = engine.update_loan(user.actor(), id, request).await?;
    Ok(Json(ApiResponse::ok(loan)))
}

/// Body is optional; without one the proposed or default rate applies
pub async fn accept_loan(
    State(engine): State<Arc<LoanEngine>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    request: Result<Json<AcceptLoanRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<LoanRequest>>, ApiError> {
    let request = optional_body(request)?;
    let loan = engine.accept_loan(user.actor(), id, request).await?;
    Ok(Json(ApiResponse::ok(loan)))
}

pub async fn cancel_loan(
    State(engine): State<Arc<LoanEngine>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<LoanRequest>>, ApiError> {
    let loan = engine.cancel_loan(user.actor(), id).await?;
    Ok(Json(ApiResponse::ok(loan)))
}

pub async fn fulfill_loan(
    State(engine): State<Arc<LoanEngine>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<LoanRequest>>, ApiError> {
    let loan = engine.fulfill_loan(user.actor(), id).await?;
    Ok(Json(ApiResponse::ok(loan)))
}

/// Serves both `/repayments` and `/repayment`; one guarded operation
pub async fn record_repayment(
    State(engine): State<Arc<LoanEngine>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(request): Json<RecordRepaymentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<RepaymentReceipt>>), ApiError> {
    let receipt = engine.record_repayment(user.actor(), id, request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(receipt))))
}

pub async fn list_repayments(
    State(engine): State<Arc<LoanEngine>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<RepaymentEntry>>>, ApiError> {
    let entries = engine.repayments(user.actor(), id).await?;
    Ok(Json(ApiResponse::ok(entries)))
}

pub async fn get_balance(
    State(engine): State<Arc<LoanEngine>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<BalanceSummary>>, ApiError> {
    let balance = engine.balance(user.actor(), id).await?;
    Ok(Json(ApiResponse::ok(balance)))
}

pub async fn rate_loan(
    State(engine): State<Arc<LoanEngine>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(request): Json<RateLoanRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Rating>>), ApiError> {
    let rating = engine.rate_loan(user.actor(), id, request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(rating))))
}

pub async fn list_ratings(
    State(engine): State<Arc<LoanEngine>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<Rating>>>, ApiError> {
    let ratings = engine.ratings(user.actor(), id).await?;
    Ok(Json(ApiResponse::ok(ratings)))
}

pub async fn loan_activity(
    State(engine): State<Arc<LoanEngine>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<LifecycleEvent>>>, ApiError> {
    let events = engine.activity(user.actor(), id).await?;
    Ok(Json(ApiResponse::ok(events)))
}
