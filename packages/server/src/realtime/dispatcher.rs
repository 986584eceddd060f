//! Fan-out of typed events to connected identities.

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, error};

use super::hub::Hub;
use crate::common::UserId;

/// An event that can be pushed to clients.
///
/// Implementors serialize as `{"type": <event_type>, "payload": {...}}`.
pub trait WireEvent: Serialize + Send + Sync {
    fn event_type(&self) -> &'static str;
}

/// Serializes events once and hands them to the [`Hub`].
#[derive(Clone)]
pub struct BroadcastDispatcher {
    hub: Hub,
}

impl BroadcastDispatcher {
    pub fn new(hub: Hub) -> Self {
        Self { hub }
    }

    /// Push `event` to every connected identity in `identities`.
    ///
    /// Returns after the handoff to the hub. Recipients that are offline or
    /// too slow simply miss the event; nothing is surfaced to the caller.
    pub async fn broadcast_to_identities<E: WireEvent>(
        &self,
        identities: impl IntoIterator<Item = UserId>,
        event: &E,
    ) {
        let payload = match serde_json::to_vec(event) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                error!(event_type = event.event_type(), error = %e, "Failed to serialize event");
                return;
            }
        };

        debug!(event_type = event.event_type(), bytes = payload.len(), "Broadcasting event");
        self.hub.deliver(identities, payload).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    #[serde(tag = "type", content = "payload", rename_all = "snake_case")]
    enum TestEvent {
        Pinged { seq: u32 },
    }

    impl WireEvent for TestEvent {
        fn event_type(&self) -> &'static str {
            "pinged"
        }
    }

    #[tokio::test]
    async fn test_serialized_once_for_every_recipient() {
        let hub = Hub::spawn(8);
        let dispatcher = BroadcastDispatcher::new(hub.clone());
        let alice = UserId::new();
        let bob = UserId::new();
        let mut alice_conn = hub.register(alice).await.unwrap();
        let mut bob_conn = hub.register(bob).await.unwrap();

        dispatcher
            .broadcast_to_identities([alice, bob], &TestEvent::Pinged { seq: 7 })
            .await;

        let expected = serde_json::json!({"type": "pinged", "payload": {"seq": 7}});
        for conn in [&mut alice_conn, &mut bob_conn] {
            let bytes = conn.outbound.recv().await.unwrap();
            let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(value, expected);
        }
    }

    #[tokio::test]
    async fn test_offline_recipients_are_skipped() {
        let hub = Hub::spawn(8);
        let dispatcher = BroadcastDispatcher::new(hub.clone());

        // Nobody connected; must not block or panic
        dispatcher
            .broadcast_to_identities([UserId::new(), UserId::new()], &TestEvent::Pinged { seq: 1 })
            .await;
        assert_eq!(hub.connection_count(), 0);
    }
}
