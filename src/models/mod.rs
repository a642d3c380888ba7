//! Shared API models

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role carried in a user's access token
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Borrower,
    Lender,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Borrower => "borrower",
            UserRole::Lender => "lender",
            UserRole::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "borrower" => Some(UserRole::Borrower),
            "lender" => Some(UserRole::Lender),
            "admin" => Some(UserRole::Admin),
            _ => None,
        }
    }
}

/// Authenticated caller of an engine operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: UserRole,
}

impl Actor {
    pub fn new(user_id: Uuid, role: UserRole) -> Self {
        Self { user_id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Pagination parameters
#[derive(Debug, Deserialize, Clone, Copy, Default)]
pub struct PaginationParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl PaginationParams {
    /// Page (1-based) and limit clamped to 1..=100
    pub fn resolve(&self) -> (i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self.limit.unwrap_or(20).clamp(1, 100);
        (page, limit)
    }

    pub fn offset(&self) -> i64 {
        let (page, limit) = self.resolve();
        (page - 1) * limit
    }
}

/// Paginated response
#[derive(Debug, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, total: i64, params: PaginationParams) -> Self {
        let (page, limit) = params.resolve();
        Self {
            data,
            total,
            page,
            limit,
        }
    }

    /// Cut one page out of an already filtered and ordered list
    pub fn from_all(all: Vec<T>, params: PaginationParams) -> Self {
        let total = all.len() as i64;
        let (_, limit) = params.resolve();
        let data = all
            .into_iter()
            .skip(params.offset() as usize)
            .take(limit as usize)
            .collect();
        Self::new(data, total, params)
    }
}
