//! Per-topic room pipeline
//!
//! Each room bridges four legs: client lines arrive on the `incoming`
//! channel and are published to the broker topic named after the room; the
//! broker subscription feeds the `outgoing` channel; the fan-out task drains
//! `outgoing` into the room's ring buffer, where every connected client's
//! drainer picks them up at its own pace.
//!
//! Every message round-trips through the broker, including those from
//! clients on this instance, so local and remote publishers share one code
//! path and all server instances see an identical stream.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{ debug, info, warn };

use crate::broker::BrokerPool;
use crate::constants::{ INGRESS_CHANNEL_CAPACITY, ROOM_OUTGOING_CAPACITY };
use crate::message::Message;
use crate::ring::RingBuffer;

/// Record the room keeps per connected client
#[derive(Debug, Clone)]
pub struct ClientInfo {
    /// User id presented in the handshake
    pub uid: String,
    /// Remote socket address
    pub peer: SocketAddr,
}

/// The subset of room state a client's tasks need.
///
/// Clients hold this handle plus the room *name*; the room holds plain
/// [`ClientInfo`] records. Neither side owns the other, so teardown is a
/// map removal, not a reference-cycle hunt.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    /// Room name (also the broker topic)
    pub name: String,
    /// Sender feeding the room's publisher task
    pub incoming: mpsc::Sender<Message>,
    /// The room's ring buffer, for attaching drain consumers
    pub ring: Arc<RingBuffer>,
    /// Fires when the room shuts down
    pub cancel: CancellationToken,
}

/// One chat room: a broker topic, a ring buffer, and the tasks in between.
pub struct Room {
    name: String,
    clients: RwLock<HashMap<u64, ClientInfo>>,
    incoming_tx: mpsc::Sender<Message>,
    outgoing_tx: mpsc::Sender<Message>,
    ring: Arc<RingBuffer>,
    cancel: CancellationToken,
}

impl Room {
    /// Create the room and start its pipeline tasks on `tracker`.
    ///
    /// The room token is a child of `parent`, so server shutdown reaches
    /// every room without touching the registry.
    pub fn start(
        name: impl Into<String>,
        pool: Arc<BrokerPool>,
        tracker: &TaskTracker,
        parent: &CancellationToken
    ) -> Arc<Self> {
        let name = name.into();
        let cancel = parent.child_token();
        let (incoming_tx, incoming_rx) = mpsc::channel(INGRESS_CHANNEL_CAPACITY);
        let (outgoing_tx, outgoing_rx) = mpsc::channel(ROOM_OUTGOING_CAPACITY);

        let room = Arc::new(Self {
            name: name.clone(),
            clients: RwLock::new(HashMap::new()),
            incoming_tx,
            outgoing_tx,
            ring: Arc::new(RingBuffer::new()),
            cancel: cancel.clone(),
        });

        tracker.spawn(publisher(
            name.clone(),
            incoming_rx,
            Arc::clone(&pool),
            cancel.clone()
        ));
        tracker.spawn(subscriber(name.clone(), room.outgoing_tx.clone(), pool, cancel.clone()));
        tracker.spawn(fan_out(Arc::clone(&room.ring), outgoing_rx, cancel));

        debug!(room = %name, "room pipeline started");
        room
    }

    /// Room name; also the broker topic
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a connected client
    pub fn add_client(&self, conn_id: u64, info: ClientInfo) {
        self.clients.write().insert(conn_id, info);
    }

    /// Remove a client record; quiet if already gone
    pub fn del_client(&self, conn_id: u64) {
        self.clients.write().remove(&conn_id);
    }

    /// Number of currently connected clients
    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Current producer position of the room's ring
    pub fn producer_pos(&self) -> i64 {
        self.ring.producer_pos()
    }

    /// Handle for a client joining this room
    pub fn handle(&self) -> RoomHandle {
        RoomHandle {
            name: self.name.clone(),
            incoming: self.incoming_tx.clone(),
            ring: Arc::clone(&self.ring),
            cancel: self.cancel.clone(),
        }
    }

    /// Whether the pipeline has been torn down.
    ///
    /// A cancelled room still holding client records is dead, not idle; the
    /// registry must replace it instead of handing it out again.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Shut the pipeline down. Idempotent.
    pub fn quit(&self) {
        info!(room = %self.name, clients = self.client_count(), "closing room");
        self.cancel.cancel();
    }

    /// Sender feeding the fan-out leg, as the subscriber task uses it
    #[cfg(test)]
    pub(crate) fn outgoing_sender(&self) -> mpsc::Sender<Message> {
        self.outgoing_tx.clone()
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("name", &self.name)
            .field("clients", &self.client_count())
            .field("producer_pos", &self.producer_pos())
            .finish()
    }
}

/// Drain `incoming` and publish every message to the room's topic.
async fn publisher(
    name: String,
    mut incoming: mpsc::Receiver<Message>,
    pool: Arc<BrokerPool>,
    cancel: CancellationToken
) {
    let Some(client) = pool.get().await else {
        warn!(room = %name, "no broker connection available, publisher dormant");
        return;
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = incoming.recv() => {
                let Some(msg) = msg else { break };
                let payload = match serde_json::to_vec(&msg) {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(room = %name, %err, "failed to encode message");
                        continue;
                    }
                };
                if let Err(err) = client.publish(name.clone(), payload.into()).await {
                    warn!(room = %name, %err, "broker publish failed, publisher exiting");
                    break;
                }
            }
        }
    }
    debug!(room = %name, "publisher stopped");
}

/// Hold the topic subscription and forward received messages to `outgoing`.
///
/// Losing the subscription tears the whole room down; the registry will
/// recreate it on the next join rather than leave it half-dead.
async fn subscriber(
    name: String,
    outgoing: mpsc::Sender<Message>,
    pool: Arc<BrokerPool>,
    cancel: CancellationToken
) {
    let Some(client) = pool.get().await else {
        warn!(room = %name, "no broker connection available, subscriber dormant");
        return;
    };

    let mut subscription = match client.subscribe(name.clone()).await {
        Ok(sub) => sub,
        Err(err) => {
            warn!(room = %name, %err, "broker subscribe failed, tearing room down");
            cancel.cancel();
            return;
        }
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            delivery = subscription.next() => {
                match delivery {
                    Some(raw) => {
                        match serde_json::from_slice::<Message>(&raw.payload) {
                            Ok(msg) => {
                                if outgoing.send(msg).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => warn!(room = %name, %err, "undecodable broker payload"),
                        }
                    }
                    None => {
                        warn!(room = %name, "broker subscription lost, tearing room down");
                        cancel.cancel();
                        break;
                    }
                }
            }
        }
    }
    debug!(room = %name, "subscriber stopped");
}

/// Drain `outgoing` into the ring buffer.
async fn fan_out(
    ring: Arc<RingBuffer>,
    mut outgoing: mpsc::Receiver<Message>,
    cancel: CancellationToken
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = outgoing.recv() => {
                let Some(msg) = msg else { break };
                ring.put(&msg.data);
            }
        }
    }
}
