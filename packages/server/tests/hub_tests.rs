//! Connection registry behaviour as seen by sessions and publishers.

mod common;

use std::time::Duration;

use bytes::Bytes;
use common::SETTLE;
use relay_core::common::UserId;
use relay_core::realtime::Hub;

#[tokio::test]
async fn test_new_connection_replaces_and_closes_previous() {
    let hub = Hub::spawn_default();
    let alice = UserId::new();

    let mut first = hub.register(alice).await.unwrap();
    let mut second = hub.register(alice).await.unwrap();
    assert_ne!(first.connection_id, second.connection_id);

    // First connection is closed: liveness cancelled, queue drained to end
    tokio::time::timeout(SETTLE, first.liveness.cancelled())
        .await
        .expect("previous connection not cancelled");
    assert!(first.outbound.recv().await.is_none());
    assert_eq!(hub.connection_count(), 1);

    hub.deliver([alice], Bytes::from_static(b"{\"n\":1}")).await;
    let frame = tokio::time::timeout(SETTLE, second.outbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&frame[..], b"{\"n\":1}");
}

#[tokio::test]
async fn test_deliver_to_offline_identity_is_noop() {
    let hub = Hub::spawn_default();
    let online = UserId::new();
    let mut registration = hub.register(online).await.unwrap();

    hub.deliver([UserId::new()], Bytes::from_static(b"lost")).await;
    hub.deliver([online], Bytes::from_static(b"kept")).await;

    let frame = tokio::time::timeout(SETTLE, registration.outbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&frame[..], b"kept");
    assert_eq!(hub.connection_count(), 1);
}

#[tokio::test]
async fn test_saturated_connection_is_evicted_without_affecting_others() {
    let hub = Hub::spawn(1);
    let slow = UserId::new();
    let fast = UserId::new();

    let mut slow_conn = hub.register(slow).await.unwrap();
    let mut fast_conn = hub.register(fast).await.unwrap();

    hub.deliver([slow, fast], Bytes::from_static(b"one")).await;
    let frame = tokio::time::timeout(SETTLE, fast_conn.outbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&frame[..], b"one");

    // Slow never drained "one", so "two" overflows its queue
    hub.deliver([slow, fast], Bytes::from_static(b"two")).await;
    let frame = tokio::time::timeout(SETTLE, fast_conn.outbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&frame[..], b"two");

    tokio::time::timeout(SETTLE, hub.wait_for_connections(|n| n == 1))
        .await
        .expect("slow connection not evicted");
    assert!(slow_conn.liveness.is_cancelled());

    // Whatever was queued before eviction is still readable, then the queue ends
    assert_eq!(&slow_conn.outbound.recv().await.unwrap()[..], b"one");
    assert!(slow_conn.outbound.recv().await.is_none());

    // The fast connection keeps working
    hub.deliver([fast], Bytes::from_static(b"three")).await;
    let frame = tokio::time::timeout(SETTLE, fast_conn.outbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&frame[..], b"three");
}

#[tokio::test]
async fn test_unregister_closes_connection() {
    let hub = Hub::spawn_default();
    let alice = UserId::new();
    let mut registration = hub.register(alice).await.unwrap();

    hub.unregister(alice).await;

    tokio::time::timeout(SETTLE, registration.liveness.cancelled())
        .await
        .expect("connection not cancelled");
    assert!(registration.outbound.recv().await.is_none());
    tokio::time::timeout(Duration::from_secs(1), hub.wait_for_connections(|n| n == 0))
        .await
        .unwrap();
}
