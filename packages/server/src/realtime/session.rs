//! Per-connection read/write pumps.
//!
//! A session bridges one WebSocket to the [`Hub`]. The writer drains the
//! connection's outbound queue; the reader parses client frames and hands the
//! ones it understands to an [`InboundHandler`]. Either side finishing
//! unregisters the connection, which in turn stops the other side.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::Message;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::hub::{Hub, Registration};
use crate::common::{ConversationId, MessageId, UserId};

/// Keepalive ping period for idle connections.
const PING_PERIOD: Duration = Duration::from_secs(54);

/// Client → server frames the session understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Typing(TypingFrame),
    Read(ReadFrame),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TypingFrame {
    pub conversation_id: ConversationId,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReadFrame {
    pub message_id: MessageId,
}

/// Receives parsed client frames on behalf of one identity.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, identity: UserId, frame: InboundFrame);
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Parse a `{type, payload}` text frame. Unknown types and malformed frames
/// yield `None`.
pub fn parse_frame(text: &str) -> Option<InboundFrame> {
    let raw: RawFrame = match serde_json::from_str(text) {
        Ok(raw) => raw,
        Err(e) => {
            debug!(error = %e, "Ignoring malformed frame");
            return None;
        }
    };

    let parsed = match raw.kind.as_str() {
        "typing" => serde_json::from_value(raw.payload).map(InboundFrame::Typing),
        "read" => serde_json::from_value(raw.payload).map(InboundFrame::Read),
        other => {
            debug!(frame_type = other, "Ignoring unknown frame type");
            return None;
        }
    };

    parsed
        .map_err(|e| debug!(frame_type = %raw.kind, error = %e, "Ignoring frame with bad payload"))
        .ok()
}

/// Run both pumps until the connection ends.
///
/// Resolves after the reader and writer have both stopped and the connection
/// has been unregistered.
pub async fn run_session<S, R, E>(
    hub: Hub,
    registration: Registration,
    sink: S,
    stream: R,
    handler: Arc<dyn InboundHandler>,
) where
    S: Sink<Message> + Unpin + Send,
    S::Error: std::fmt::Display,
    R: Stream<Item = Result<Message, E>> + Unpin + Send,
    E: std::fmt::Display,
{
    let Registration {
        identity,
        connection_id,
        outbound,
        liveness,
    } = registration;

    info!(user_id = %identity, connection_id = %connection_id, "Session started");

    let writer = async {
        write_pump(sink, outbound).await;
        hub.unregister_connection(identity, connection_id).await;
    };
    let reader = async {
        read_pump(identity, stream, liveness, handler.as_ref()).await;
        hub.unregister_connection(identity, connection_id).await;
    };
    tokio::join!(writer, reader);

    info!(user_id = %identity, connection_id = %connection_id, "Session ended");
}

async fn write_pump<S>(mut sink: S, mut outbound: mpsc::Receiver<Bytes>)
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let mut keepalive = interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);

    loop {
        let message = tokio::select! {
            payload = outbound.recv() => match payload {
                Some(payload) => match String::from_utf8(payload.to_vec()) {
                    Ok(text) => Message::Text(text),
                    Err(e) => {
                        debug!(error = %e, "Dropping non UTF-8 payload");
                        continue;
                    }
                },
                None => {
                    // Queue closed by the hub
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
            },
            _ = keepalive.tick() => Message::Ping(Vec::new()),
        };

        if let Err(e) = sink.send(message).await {
            debug!(error = %e, "Write failed; closing session");
            return;
        }
    }
}

async fn read_pump<R, E>(
    identity: UserId,
    mut stream: R,
    liveness: CancellationToken,
    handler: &dyn InboundHandler,
) where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    loop {
        let next = tokio::select! {
            _ = liveness.cancelled() => return,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                if let Some(frame) = parse_frame(&text) {
                    handler.handle(identity, frame).await;
                }
            }
            Some(Ok(Message::Close(_))) | None => return,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(user_id = %identity, error = %e, "Read failed; closing session");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHandler {
        frames: Mutex<Vec<(UserId, InboundFrame)>>,
    }

    #[async_trait]
    impl InboundHandler for RecordingHandler {
        async fn handle(&self, identity: UserId, frame: InboundFrame) {
            self.frames.lock().unwrap().push((identity, frame));
        }
    }

    type ClientTx = fmpsc::UnboundedSender<Result<Message, std::io::Error>>;
    type ClientRx = fmpsc::UnboundedReceiver<Message>;

    async fn start(
        hub: &Hub,
        identity: UserId,
        handler: Arc<RecordingHandler>,
    ) -> (ClientTx, ClientRx, tokio::task::JoinHandle<()>) {
        let registration = hub.register(identity).await.unwrap();
        let (to_server, from_client) = fmpsc::unbounded();
        let (to_client, from_server) = fmpsc::unbounded();
        let task = tokio::spawn(run_session(
            hub.clone(),
            registration,
            to_client,
            from_client,
            handler,
        ));
        (to_server, from_server, task)
    }

    #[test]
    fn test_parse_known_frames() {
        let conversation_id = ConversationId::new();
        let text = format!(
            r#"{{"type":"typing","payload":{{"conversation_id":"{}","is_typing":true}}}}"#,
            conversation_id
        );
        assert_eq!(
            parse_frame(&text),
            Some(InboundFrame::Typing(TypingFrame {
                conversation_id,
                is_typing: true,
            }))
        );
    }

    #[test]
    fn test_parse_ignores_unknown_and_malformed() {
        assert_eq!(parse_frame(r#"{"type":"presence","payload":{}}"#), None);
        assert_eq!(parse_frame(r#"{"type":"read","payload":{"message_id":42}}"#), None);
        assert_eq!(parse_frame("not json"), None);
    }

    #[tokio::test]
    async fn test_outbound_payloads_become_text_frames() {
        let hub = Hub::spawn(8);
        let alice = UserId::new();
        let (_client_tx, mut client_rx, _task) =
            start(&hub, alice, Arc::new(RecordingHandler::default())).await;

        hub.deliver([alice], Bytes::from_static(b"{\"type\":\"ping\"}")).await;

        assert_eq!(
            client_rx.next().await,
            Some(Message::Text("{\"type\":\"ping\"}".to_string()))
        );
    }

    #[tokio::test]
    async fn test_inbound_frames_reach_handler() {
        let hub = Hub::spawn(8);
        let alice = UserId::new();
        let handler = Arc::new(RecordingHandler::default());
        let (client_tx, _client_rx, task) = start(&hub, alice, handler.clone()).await;

        let message_id = MessageId::new();
        client_tx
            .unbounded_send(Ok(Message::Text(format!(
                r#"{{"type":"read","payload":{{"message_id":"{}"}}}}"#,
                message_id
            ))))
            .unwrap();
        client_tx
            .unbounded_send(Ok(Message::Text(r#"{"type":"future_thing"}"#.into())))
            .unwrap();
        client_tx.unbounded_send(Ok(Message::Close(None))).unwrap();
        task.await.unwrap();

        let frames = handler.frames.lock().unwrap().clone();
        assert_eq!(frames, vec![(alice, InboundFrame::Read(ReadFrame { message_id }))]);
    }

    #[tokio::test]
    async fn test_client_close_unregisters() {
        let hub = Hub::spawn(8);
        let alice = UserId::new();
        let (client_tx, _client_rx, task) =
            start(&hub, alice, Arc::new(RecordingHandler::default())).await;
        assert_eq!(hub.connection_count(), 1);

        drop(client_tx);
        task.await.unwrap();

        hub.wait_for_connections(|n| n == 0).await;
    }

    #[tokio::test]
    async fn test_replaced_session_sends_close_and_ends() {
        let hub = Hub::spawn(8);
        let alice = UserId::new();
        let (_client_tx, mut client_rx, task) =
            start(&hub, alice, Arc::new(RecordingHandler::default())).await;

        let _replacement = hub.register(alice).await.unwrap();
        task.await.unwrap();

        assert!(matches!(client_rx.next().await, Some(Message::Close(None))));
        assert_eq!(hub.connection_count(), 1);
    }
}
