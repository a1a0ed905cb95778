//! Blacklist filter consulted on the message ingress path
//!
//! The table lives in `<filter_dir>/blacklist.json`: one JSON object mapping
//! a user id to either a room name (a string, muting that user in that room)
//! or any non-string value (historically the number `0`, muting everywhere).
//! The file is re-read periodically; a missing or malformed file disables
//! the filter until a later reload succeeds.

use std::collections::HashMap;
use std::path::{ Path, PathBuf };
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{ debug, info, warn };

use crate::constants::BLACKLIST_RELOAD_INTERVAL;

#[derive(Debug, Default)]
struct BlacklistTable {
    enabled: bool,
    entries: HashMap<String, Value>,
}

/// JSON-backed `(user, room)` mute table with hot reload.
#[derive(Debug)]
pub struct Blacklist {
    path: PathBuf,
    table: RwLock<BlacklistTable>,
}

impl Blacklist {
    /// Create a filter backed by the given file and load it once.
    ///
    /// A missing or unreadable file is not fatal; the filter simply starts
    /// disabled.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let filter = Self {
            path: path.into(),
            table: RwLock::new(BlacklistTable::default()),
        };
        filter.reload();
        filter
    }

    /// Whether the filter is currently active
    pub fn is_enabled(&self) -> bool {
        self.table.read().enabled
    }

    /// Re-read the table from disk, atomically swapping it in on success.
    ///
    /// Any failure disables the filter and is retried on the next tick.
    pub fn reload(&self) {
        let entries = match Self::load_entries(&self.path) {
            Ok(entries) => entries,
            Err(reason) => {
                warn!(path = %self.path.display(), %reason, "blacklist disabled");
                self.table.write().enabled = false;
                return;
            }
        };

        debug!(path = %self.path.display(), entries = entries.len(), "blacklist loaded");
        let mut table = self.table.write();
        table.enabled = true;
        table.entries = entries;
    }

    fn load_entries(path: &Path) -> std::result::Result<HashMap<String, Value>, String> {
        if !path.exists() {
            return Err("file not found".to_string());
        }
        let raw = std::fs::read(path).map_err(|e| e.to_string())?;
        serde_json::from_slice::<HashMap<String, Value>>(&raw).map_err(|e| e.to_string())
    }

    /// Whether `uid` is muted in `room`.
    ///
    /// True iff the filter is enabled, an entry for `uid` exists, and the
    /// entry is either the global-mute sentinel (any non-string value) or
    /// names exactly this room.
    pub fn is_blocked(&self, uid: &str, room: &str) -> bool {
        let table = self.table.read();
        if !table.enabled {
            return false;
        }

        match table.entries.get(uid) {
            None => false,
            Some(Value::String(muted_room)) => muted_room == room,
            Some(_) => true,
        }
    }

    /// Spawn the periodic reload task on `tracker`
    pub fn spawn_reload(self: &Arc<Self>, tracker: &TaskTracker, cancel: CancellationToken) {
        let filter = Arc::clone(self);
        tracker.spawn(async move {
            let mut ticker = tokio::time::interval(BLACKLIST_RELOAD_INTERVAL);
            ticker.tick().await; // the construction-time load covers the first tick
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => filter.reload(),
                }
            }
            info!("blacklist reload task stopped");
        });
    }
}
