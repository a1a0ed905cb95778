//! Broker connection pool
//!
//! A small pool of NATS client sessions shared by all rooms. Selection is
//! round-robin; an unhealthy slot is repaired lazily on `get`, while a
//! background task only observes and logs. Zero live connections is a
//! degraded state, not a fatal one; rooms that cannot obtain a connection
//! log and go dormant until recreated.

use std::sync::Arc;
use std::sync::atomic::{ AtomicUsize, Ordering };

use async_nats::connection::State;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{ debug, info, warn };

use crate::constants::{
    BROKER_MAX_RECONNECTS,
    BROKER_PING_INTERVAL,
    BROKER_RECONNECT_WAIT,
    DEFAULT_POOL_CONNECTIONS,
    POOL_HEALTH_CHECK_INTERVAL,
};
use crate::error::{ ChatError, Result };

/// One pooled broker session
#[derive(Debug, Clone)]
pub struct BrokerConnection {
    client: async_nats::Client,
}

impl BrokerConnection {
    /// Whether the underlying session is currently connected.
    ///
    /// The client reconnects on its own up to its retry limit; `Pending`
    /// and `Disconnected` both count as unhealthy here so `get` swaps the
    /// slot instead of waiting out the retry loop.
    pub fn is_healthy(&self) -> bool {
        self.client.connection_state() == State::Connected
    }

    /// The wrapped client handle
    pub fn client(&self) -> async_nats::Client {
        self.client.clone()
    }
}

/// Round-robin pool of broker connections with lazy repair.
pub struct BrokerPool {
    url: String,
    connections: RwLock<Vec<BrokerConnection>>,
    index: AtomicUsize,
}

impl BrokerPool {
    /// Eagerly open up to `max_connections` sessions against `url`.
    ///
    /// Individual connect failures are logged and skipped; the pool comes up
    /// with whatever subset succeeded.
    pub async fn connect(url: impl Into<String>, max_connections: usize) -> Self {
        let url = url.into();
        let max_connections = max_connections.max(DEFAULT_POOL_CONNECTIONS);

        let mut connections = Vec::with_capacity(max_connections);
        for i in 0..max_connections {
            match Self::connect_one(&url).await {
                Ok(conn) => connections.push(conn),
                Err(err) => warn!(slot = i, %err, "failed to open broker connection"),
            }
        }

        info!(url = %url, connections = connections.len(), "broker pool initialized");
        Self {
            url,
            connections: RwLock::new(connections),
            index: AtomicUsize::new(0),
        }
    }

    async fn connect_one(url: &str) -> Result<BrokerConnection> {
        let client = async_nats::ConnectOptions::new()
            .ping_interval(BROKER_PING_INTERVAL)
            .max_reconnects(BROKER_MAX_RECONNECTS)
            .reconnect_delay_callback(|_attempts| BROKER_RECONNECT_WAIT)
            .event_callback(|event| async move {
                debug!(?event, "broker connection event");
            })
            .connect(url).await
            .map_err(|e| ChatError::broker(e.to_string()))?;

        Ok(BrokerConnection { client })
    }

    /// Take the next connection round-robin.
    ///
    /// An unhealthy slot triggers a synchronous reconnect; if that fails the
    /// broken handle is returned anyway so the caller fails fast rather than
    /// hanging. `None` only when the pool holds no connections at all.
    pub async fn get(&self) -> Option<async_nats::Client> {
        let idx = {
            let connections = self.connections.read().await;
            if connections.is_empty() {
                return None;
            }
            let idx = self.index.fetch_add(1, Ordering::Relaxed) % connections.len();
            let conn = &connections[idx];
            if conn.is_healthy() {
                return Some(conn.client());
            }
            idx
        };

        warn!(slot = idx, "broker connection unhealthy, reconnecting");
        self.reconnect_slot(idx).await
    }

    async fn reconnect_slot(&self, idx: usize) -> Option<async_nats::Client> {
        let mut connections = self.connections.write().await;

        let existing = {
            let conn = connections.get(idx)?;
            // Another caller may have repaired the slot while we waited
            if conn.is_healthy() {
                return Some(conn.client());
            }
            conn.client()
        };

        match Self::connect_one(&self.url).await {
            Ok(fresh) => {
                info!(slot = idx, "broker connection reconnected");
                let client = fresh.client();
                connections[idx] = fresh;
                Some(client)
            }
            Err(err) => {
                // Keep the broken slot for the next attempt; the caller sees
                // a dead handle and fails fast.
                warn!(slot = idx, %err, "broker reconnect failed");
                Some(existing)
            }
        }
    }

    /// Number of currently healthy connections
    pub async fn healthy_count(&self) -> usize {
        self.connections.read().await
            .iter()
            .filter(|c| c.is_healthy())
            .count()
    }

    /// Total pooled connections, healthy or not
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Whether the pool holds no connections at all
    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Spawn the periodic health observer.
    ///
    /// It marks trouble in the log only; repair stays lazy on `get`.
    pub fn spawn_health_check(self: &Arc<Self>, tracker: &TaskTracker, cancel: CancellationToken) {
        let pool = Arc::clone(self);
        tracker.spawn(async move {
            let mut ticker = tokio::time::interval(POOL_HEALTH_CHECK_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let connections = pool.connections.read().await;
                        for (i, conn) in connections.iter().enumerate() {
                            if !conn.is_healthy() {
                                warn!(slot = i, "broker connection unhealthy, repair deferred to next get");
                            }
                        }
                    }
                }
            }
            info!("broker health check stopped");
        });
    }

    /// Flush and drop every pooled connection
    pub async fn close(&self) {
        let connections = std::mem::take(&mut *self.connections.write().await);
        for conn in connections {
            if let Err(err) = conn.client.flush().await {
                debug!(%err, "flush on close failed");
            }
        }
        info!("broker pool closed");
    }
}

impl std::fmt::Debug for BrokerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerPool").field("url", &self.url).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_pool() -> BrokerPool {
        BrokerPool {
            url: "nats://127.0.0.1:1".to_string(),
            connections: RwLock::new(Vec::new()),
            index: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn test_empty_pool_returns_none() {
        let pool = empty_pool();
        assert!(pool.get().await.is_none());
        assert!(pool.is_empty().await);
        assert_eq!(pool.healthy_count().await, 0);
    }

    #[tokio::test]
    async fn test_close_on_empty_pool_is_quiet() {
        let pool = empty_pool();
        pool.close().await;
        assert_eq!(pool.len().await, 0);
    }

    #[tokio::test]
    async fn test_connect_against_unreachable_broker_degrades() {
        // No listener on this port: the pool must come up empty, not panic
        let pool = BrokerPool::connect("nats://127.0.0.1:1", 2).await;
        assert!(pool.is_empty().await);
        assert!(pool.get().await.is_none());
    }
}
