// Shared types used across domains
pub mod ids;
pub mod pagination;

pub use ids::*;
pub use pagination::{Page, PageParams};
