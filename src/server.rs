//! The chat server: TLS listener, room registry and background upkeep
//!
//! The server owns every registry in the process (rooms, the broker pool,
//! the blacklist) plus one cancellation token and one task tracker. Rooms
//! are created lazily on first join and reaped once empty; clients are
//! handled by their own task trio and only ever hold a room *handle*.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{ AtomicU64, Ordering };

use parking_lot::RwLock;
use tokio::net::{ TcpListener, TcpStream };
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{ info, warn };

use crate::broker::BrokerPool;
use crate::client;
use crate::codec::{ LineReader, LineWriter };
use crate::config::ServerOptions;
use crate::constants::{ KEEPALIVE_PERIOD, ROOM_REAP_INTERVAL, STATUS_REPORT_INTERVAL };
use crate::error::Result;
use crate::filter::Blacklist;
use crate::room::{ ClientInfo, Room };
use crate::tls;

/// A chat server instance.
pub struct ChatServer {
    options: ServerOptions,
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    pool: Arc<BrokerPool>,
    blacklist: Arc<Blacklist>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    next_conn_id: AtomicU64,
}

impl ChatServer {
    /// Connect the broker pool, load the blacklist and assemble a server.
    ///
    /// Neither an unreachable broker nor a missing blacklist file is fatal;
    /// both degrade and recover on their own schedules.
    pub async fn new(options: ServerOptions) -> Arc<Self> {
        let pool = Arc::new(
            BrokerPool::connect(options.broker_url.clone(), options.pool_connections).await
        );
        let blacklist = Arc::new(Blacklist::new(options.blacklist_path()));

        Arc::new(Self {
            options,
            rooms: RwLock::new(HashMap::new()),
            pool,
            blacklist,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            next_conn_id: AtomicU64::new(0),
        })
    }

    /// Token that stops the accept loop and all background tasks
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Number of live rooms
    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }

    /// Look up a room, creating and starting it on first use.
    ///
    /// Double-checked locking: concurrent callers for the same name get
    /// pointer-equal rooms and exactly one pipeline is started. A cached
    /// room whose pipeline has been torn down (broker subscription loss
    /// cancels the room before the reaper ever sees it empty) counts as a
    /// miss: the stale entry is replaced with a fresh room so new joiners
    /// never land on a dead pipeline.
    pub fn get_room(&self, name: &str) -> Arc<Room> {
        if let Some(room) = self.rooms.read().get(name) {
            if !room.is_cancelled() {
                return Arc::clone(room);
            }
        }

        let mut rooms = self.rooms.write();
        if let Some(room) = rooms.get(name) {
            if !room.is_cancelled() {
                return Arc::clone(room);
            }
            info!(room = name, "replacing dead room");
        } else {
            info!(room = name, "creating room");
        }

        let room = Room::start(name, Arc::clone(&self.pool), &self.tracker, &self.cancel);
        rooms.insert(name.to_string(), Arc::clone(&room));
        room
    }

    /// Delete and quit every room whose client map is empty.
    ///
    /// Runs under the registry write lock, so a client joining concurrently
    /// either lands before the check (room survives) or after the removal
    /// (a fresh room is created).
    fn reap_rooms(&self) {
        let mut rooms = self.rooms.write();
        rooms.retain(|name, room| {
            if room.client_count() == 0 {
                info!(room = %name, "reaping idle room");
                room.quit();
                false
            } else {
                true
            }
        });
    }

    /// Log per-room online count and producer position
    fn report_status(&self) {
        for (name, room) in self.rooms.read().iter() {
            info!(
                room = %name,
                online = room.client_count(),
                producer_pos = room.producer_pos(),
                "status"
            );
        }
    }

    fn spawn_status_reporter(self: &Arc<Self>) {
        let server = Arc::clone(self);
        self.tracker.spawn(async move {
            let mut ticker = tokio::time::interval(STATUS_REPORT_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = server.cancel.cancelled() => break,
                    _ = ticker.tick() => server.report_status(),
                }
            }
        });
    }

    fn spawn_reaper(self: &Arc<Self>) {
        let server = Arc::clone(self);
        self.tracker.spawn(async move {
            let mut ticker = tokio::time::interval(ROOM_REAP_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = server.cancel.cancelled() => break,
                    _ = ticker.tick() => server.reap_rooms(),
                }
            }
        });
    }

    /// Bind, serve and block until the cancellation token fires.
    ///
    /// Returns an error (and thus a non-zero exit) only when the listener
    /// cannot be set up; everything after that degrades per connection.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let acceptor = tls::build_acceptor(
            self.options.cert_file.as_deref(),
            self.options.key_file.as_deref()
        )?;
        let listener = TcpListener::bind(&self.options.listen).await?;
        info!(listen = %self.options.listen, "chat server listening");

        self.blacklist.spawn_reload(&self.tracker, self.cancel.clone());
        self.pool.spawn_health_check(&self.tracker, self.cancel.clone());
        self.spawn_status_reporter();
        self.spawn_reaper();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let server = Arc::clone(&self);
                            let acceptor = acceptor.clone();
                            self.tracker.spawn(async move {
                                server.handle_connection(stream, peer, acceptor).await;
                            });
                        }
                        Err(err) => {
                            if self.cancel.is_cancelled() {
                                break;
                            }
                            warn!(%err, "accept failed");
                        }
                    }
                }
            }
        }

        self.shutdown_remaining().await;
        Ok(())
    }

    async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
        acceptor: TlsAcceptor
    ) {
        if let Err(err) = configure_socket(&stream) {
            warn!(%peer, %err, "failed to configure socket");
        }

        let tls_stream = tokio::select! {
            _ = self.cancel.cancelled() => return,
            accepted = acceptor.accept(stream) => {
                match accepted {
                    Ok(stream) => stream,
                    Err(err) => {
                        warn!(%peer, %err, "tls handshake failed");
                        return;
                    }
                }
            }
        };

        let (read_half, write_half) = tokio::io::split(tls_stream);
        let mut reader = LineReader::new(read_half);
        let writer = LineWriter::new(write_half);

        let identity = tokio::select! {
            _ = self.cancel.cancelled() => return,
            handshake = client::handshake(&mut reader, &self.options.auth_password) => {
                match handshake {
                    Ok(identity) => identity,
                    Err(err) => {
                        warn!(%peer, %err, "handshake rejected");
                        return;
                    }
                }
            }
        };

        info!(%peer, uid = %identity.uid, room = %identity.room, "client joined");
        let room = self.get_room(&identity.room);
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        room.add_client(conn_id, ClientInfo { uid: identity.uid.clone(), peer });

        client::run(reader, writer, identity.clone(), room.handle(), Arc::clone(&self.blacklist)).await;

        room.del_client(conn_id);
        info!(%peer, uid = %identity.uid, "client closed");
    }

    /// Stop accepting and serving: cancel everything, close rooms and the
    /// pool, then wait for every tracked task to finish.
    async fn shutdown_remaining(&self) {
        info!("shutting down");
        self.cancel.cancel();

        let rooms = std::mem::take(&mut *self.rooms.write());
        for room in rooms.into_values() {
            room.quit();
        }

        self.pool.close().await;

        self.tracker.close();
        self.tracker.wait().await;
        info!("shutdown complete");
    }
}

impl std::fmt::Debug for ChatServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatServer")
            .field("listen", &self.options.listen)
            .field("rooms", &self.room_count())
            .finish()
    }
}

/// 120 s keepalive, Nagle left enabled.
fn configure_socket(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nodelay(false)?;
    let sock = socket2::SockRef::from(stream);
    sock.set_tcp_keepalive(&socket2::TcpKeepalive::new().with_time(KEEPALIVE_PERIOD))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn degraded_server() -> Arc<ChatServer> {
        // Port 1 is closed: the pool degrades instantly and no network is
        // needed for registry behavior.
        let options = ServerOptions::new().with_broker_url("nats://127.0.0.1:1");
        ChatServer::new(options).await
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_get_room_is_created_once() {
        let server = degraded_server().await;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let server = Arc::clone(&server);
            handles.push(tokio::spawn(async move { server.get_room("shared") }));
        }

        let mut rooms = Vec::new();
        for h in handles {
            rooms.push(h.await.unwrap());
        }

        assert_eq!(server.room_count(), 1);
        for room in &rooms[1..] {
            assert!(Arc::ptr_eq(&rooms[0], room));
        }
    }

    #[tokio::test]
    async fn test_reaper_removes_only_empty_rooms() {
        let server = degraded_server().await;

        let empty = server.get_room("empty");
        let busy = server.get_room("busy");
        busy.add_client(1, ClientInfo { uid: "u".into(), peer: peer() });
        assert_eq!(server.room_count(), 2);

        server.reap_rooms();

        assert_eq!(server.room_count(), 1);
        assert!(empty.handle().cancel.is_cancelled());
        assert!(!busy.handle().cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_room_is_recreated_after_reap() {
        let server = degraded_server().await;

        let first = server.get_room("r");
        server.reap_rooms();
        assert_eq!(server.room_count(), 0);

        let second = server.get_room("r");
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!second.handle().cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_dead_room_is_replaced_before_reap() {
        let server = degraded_server().await;

        // Torn down (as after broker subscription loss) while clients are
        // still attached, so the reaper would not touch it
        let first = server.get_room("r");
        first.add_client(1, ClientInfo { uid: "u".into(), peer: peer() });
        first.quit();
        assert!(first.is_cancelled());

        let second = server.get_room("r");
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!second.is_cancelled());
        assert_eq!(server.room_count(), 1);

        // Repeated lookups stick to the replacement
        assert!(Arc::ptr_eq(&second, &server.get_room("r")));
    }

    #[tokio::test]
    async fn test_run_fails_on_unbindable_address() {
        let options = ServerOptions::new()
            .with_broker_url("nats://127.0.0.1:1")
            .with_listen("definitely-not-an-address");
        let server = ChatServer::new(options).await;
        assert!(server.run().await.is_err());
    }
}
