//! Route definitions for the lending API

mod admin;
mod dispute;
mod loan;
mod report;

pub use admin::admin_routes;
pub use dispute::dispute_routes;
pub use loan::loan_routes;
pub use report::report_routes;
