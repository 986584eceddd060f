//! Messenger domain - direct and group conversations between users, pushed
//! to connected clients as they change.

pub mod data;
pub mod errors;
pub mod events;
pub mod models;
pub mod service;

pub use data::PgMessengerRepository;
pub use errors::MessengerError;
pub use events::*;
pub use models::*;
pub use service::MessengerService;
