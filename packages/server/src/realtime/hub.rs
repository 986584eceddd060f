//! Connection registry for pushed events.
//!
//! One control loop owns the identity → connection map. Everything else talks
//! to it through three bounded request channels (register, unregister,
//! deliver), so the map itself needs no lock.
//!
//! # Usage
//!
//! Transport (per accepted socket):
//!   let registration = hub.register(user_id).await?;
//!   run_session(hub.clone(), registration, sink, stream, handler).await;
//!
//! Producers (domain services, via the dispatcher):
//!   hub.deliver([alice, bob], payload).await;
//!
//! Each connection's outbound queue is bounded. When a deliver finds it full
//! the hub disconnects that consumer instead of waiting on it.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::common::UserId;

/// Default per-connection outbound queue bound.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

const CONTROL_CHANNEL_CAPACITY: usize = 1024;

/// Process-local id distinguishing successive connections of one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The control loop has stopped (every `Hub` handle was dropped).
#[derive(Debug, Error)]
#[error("connection hub is shut down")]
pub struct HubClosed;

/// Handed to a session after the hub has accepted its connection.
pub struct Registration {
    pub identity: UserId,
    pub connection_id: ConnectionId,
    /// Drained by exactly one session writer.
    pub outbound: mpsc::Receiver<Bytes>,
    /// Cancelled by the hub when it closes this connection.
    pub liveness: CancellationToken,
}

/// Hub-side half of a live connection.
struct Connection {
    id: ConnectionId,
    sender: mpsc::Sender<Bytes>,
    liveness: CancellationToken,
}

impl Connection {
    /// Dropping the only sender closes the queue; the writer sees `None`
    /// once it has drained what was already buffered.
    fn close(self) {
        self.liveness.cancel();
    }
}

struct RegisterRequest {
    identity: UserId,
    ack: oneshot::Sender<Registration>,
}

struct UnregisterRequest {
    identity: UserId,
    /// `None` removes whatever is registered for the identity.
    connection: Option<ConnectionId>,
}

struct DeliverRequest {
    targets: Vec<UserId>,
    payload: Bytes,
}

/// Cloneable handle to the registry control loop.
#[derive(Clone)]
pub struct Hub {
    register_tx: mpsc::Sender<RegisterRequest>,
    unregister_tx: mpsc::Sender<UnregisterRequest>,
    deliver_tx: mpsc::Sender<DeliverRequest>,
    connection_count: watch::Receiver<usize>,
}

impl Hub {
    /// Spawn the control loop with the default queue bound.
    pub fn spawn_default() -> Self {
        Self::spawn(DEFAULT_QUEUE_CAPACITY)
    }

    /// Spawn the control loop on the current runtime.
    ///
    /// `queue_capacity` bounds every connection's outbound queue. The loop
    /// runs until the last `Hub` clone is dropped.
    pub fn spawn(queue_capacity: usize) -> Self {
        let (register_tx, register_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let (unregister_tx, unregister_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let (deliver_tx, deliver_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let (count_tx, connection_count) = watch::channel(0);

        let control = HubLoop {
            connections: HashMap::new(),
            queue_capacity: queue_capacity.max(1),
            next_connection: 1,
            connection_count: count_tx,
        };
        tokio::spawn(control.run(register_rx, unregister_rx, deliver_rx));

        Self {
            register_tx,
            unregister_tx,
            deliver_tx,
            connection_count,
        }
    }

    /// Register a new connection for `identity`, replacing (and closing) any
    /// existing one.
    ///
    /// Returns once the control loop has applied the change, so a `deliver`
    /// issued afterwards is guaranteed to reach the new connection.
    pub async fn register(&self, identity: UserId) -> Result<Registration, HubClosed> {
        let (ack, registered) = oneshot::channel();
        self.register_tx
            .send(RegisterRequest { identity, ack })
            .await
            .map_err(|_| HubClosed)?;
        registered.await.map_err(|_| HubClosed)
    }

    /// Remove whatever connection is registered for `identity`.
    /// Unregistering an absent identity is a no-op.
    pub async fn unregister(&self, identity: UserId) {
        self.send_unregister(UnregisterRequest {
            identity,
            connection: None,
        })
        .await;
    }

    /// Remove `identity`'s connection only if it is still `connection_id`.
    ///
    /// Sessions use this for cleanup so a replaced session cannot evict the
    /// connection that superseded it.
    pub async fn unregister_connection(&self, identity: UserId, connection_id: ConnectionId) {
        self.send_unregister(UnregisterRequest {
            identity,
            connection: Some(connection_id),
        })
        .await;
    }

    async fn send_unregister(&self, request: UnregisterRequest) {
        if self.unregister_tx.send(request).await.is_err() {
            debug!("Hub stopped; unregister ignored");
        }
    }

    /// Hand `payload` to every registered target. Absent targets are skipped.
    ///
    /// Returns as soon as the request is queued for the control loop; it never
    /// waits on a recipient.
    pub async fn deliver(&self, targets: impl IntoIterator<Item = UserId>, payload: Bytes) {
        let targets: Vec<UserId> = targets
            .into_iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if targets.is_empty() {
            return;
        }

        if self
            .deliver_tx
            .send(DeliverRequest { targets, payload })
            .await
            .is_err()
        {
            debug!("Hub stopped; delivery dropped");
        }
    }

    /// Number of live connections as of the loop's last mutation.
    pub fn connection_count(&self) -> usize {
        *self.connection_count.borrow()
    }

    /// Wait until the live connection count satisfies `predicate`.
    pub async fn wait_for_connections(&self, predicate: impl Fn(usize) -> bool) {
        let mut count = self.connection_count.clone();
        let _ = count.wait_for(|n| predicate(*n)).await;
    }
}

/// The single owner of the registry map.
struct HubLoop {
    connections: HashMap<UserId, Connection>,
    queue_capacity: usize,
    next_connection: u64,
    connection_count: watch::Sender<usize>,
}

impl HubLoop {
    async fn run(
        mut self,
        mut register_rx: mpsc::Receiver<RegisterRequest>,
        mut unregister_rx: mpsc::Receiver<UnregisterRequest>,
        mut deliver_rx: mpsc::Receiver<DeliverRequest>,
    ) {
        info!(queue_capacity = self.queue_capacity, "Connection hub started");

        loop {
            tokio::select! {
                Some(request) = register_rx.recv() => self.register(request),
                Some(request) = unregister_rx.recv() => {
                    self.unregister(request.identity, request.connection)
                }
                Some(request) = deliver_rx.recv() => self.deliver(request),
                else => break,
            }
            self.connection_count.send_replace(self.connections.len());
        }

        for (_, connection) in self.connections.drain() {
            connection.close();
        }
        self.connection_count.send_replace(0);
        info!("Connection hub stopped");
    }

    fn register(&mut self, request: RegisterRequest) {
        let RegisterRequest { identity, ack } = request;

        if let Some(previous) = self.connections.remove(&identity) {
            info!(user_id = %identity, connection_id = %previous.id, "Replacing existing connection");
            previous.close();
        }

        let id = ConnectionId(self.next_connection);
        self.next_connection += 1;
        let (sender, outbound) = mpsc::channel(self.queue_capacity);
        let liveness = CancellationToken::new();

        self.connections.insert(
            identity,
            Connection {
                id,
                sender,
                liveness: liveness.clone(),
            },
        );
        self.connection_count.send_replace(self.connections.len());

        let registration = Registration {
            identity,
            connection_id: id,
            outbound,
            liveness,
        };

        // The caller may have given up waiting; don't keep a connection nobody drains
        if ack.send(registration).is_err() {
            debug!(user_id = %identity, "Registration abandoned before ack");
            self.unregister(identity, Some(id));
            return;
        }

        info!(user_id = %identity, connection_id = %id, "Connection registered");
    }

    fn unregister(&mut self, identity: UserId, only: Option<ConnectionId>) {
        let matches = match (self.connections.get(&identity), only) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(current), Some(id)) => current.id == id,
        };
        if !matches {
            return;
        }

        if let Some(connection) = self.connections.remove(&identity) {
            info!(user_id = %identity, connection_id = %connection.id, "Connection unregistered");
            connection.close();
        }
    }

    fn deliver(&mut self, request: DeliverRequest) {
        let mut evicted = Vec::new();

        for identity in request.targets {
            let Some(connection) = self.connections.get(&identity) else {
                continue;
            };

            match connection.sender.try_send(request.payload.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(
                        user_id = %identity,
                        connection_id = %connection.id,
                        "Outbound queue full; disconnecting slow consumer"
                    );
                    evicted.push(identity);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(user_id = %identity, connection_id = %connection.id, "Writer gone; evicting");
                    evicted.push(identity);
                }
            }
        }

        for identity in evicted {
            if let Some(connection) = self.connections.remove(&identity) {
                connection.close();
            }
        }
    }
}
