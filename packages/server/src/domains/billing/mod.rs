//! Billing domain - per-user token allowance.

pub mod data;
pub mod models;

pub use data::PgQuotaService;
pub use models::*;
