//! Dispute and report domain module
//!
//! Disputes reference a loan and, while open, freeze its lifecycle.
//! Reports concern user conduct and only feed administrator review.

pub mod interlock;
mod model;
mod service;

pub use model::*;
pub use service::ReportService;
