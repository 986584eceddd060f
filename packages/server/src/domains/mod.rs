// Business domains
pub mod auth;
pub mod billing;
pub mod chat;
pub mod messenger;
