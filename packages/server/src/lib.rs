// Relay - real-time delivery core
//
// Pushes messenger events to connected clients over WebSockets and streams
// model replies to chat clients as they are generated.
//
// Domain logic lives in domains/*; the connection registry and session pumps
// live in realtime/; the model stream pipeline lives in generation/.

pub mod common;
pub mod config;
pub mod domains;
pub mod generation;
pub mod kernel;
pub mod realtime;
pub mod server;

pub use config::*;
