//! Chat domain - direct conversations with a model, answered by streamed replies.

pub mod data;
pub mod errors;
pub mod models;
pub mod service;

pub use data::PgChatRepository;
pub use errors::ChatError;
pub use models::*;
pub use service::ChatService;
