// HTTP routes
pub mod chat;
pub mod health;
pub mod messenger;
pub mod ws;

pub use chat::*;
pub use health::*;
pub use ws::*;
