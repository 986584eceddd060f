//! Real-time push: connection registry, per-connection sessions, and the
//! broadcast dispatcher domain services publish through.

pub mod dispatcher;
pub mod hub;
pub mod session;

pub use dispatcher::{BroadcastDispatcher, WireEvent};
pub use hub::{ConnectionId, Hub, HubClosed, Registration, DEFAULT_QUEUE_CAPACITY};
pub use session::{parse_frame, run_session, InboundFrame, InboundHandler, ReadFrame, TypingFrame};
