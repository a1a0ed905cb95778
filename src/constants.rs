//! Chatring tuning constants
//!
//! This module contains the tuning constants and protocol values used
//! throughout the server: ring sizing, channel capacities, timer intervals
//! and broker connection parameters.

use std::time::Duration;

/// Default ring buffer size per room (must be a power of 2)
pub const DEFAULT_RING_BUFFER_SIZE: usize = 512;

/// Maximum length of a single chat line in bytes, newline excluded
///
/// Lines longer than this are rejected at the codec; the value also fixes
/// the inline payload capacity of a ring buffer slot.
pub const MAX_LINE_LENGTH: usize = 1024;

/// Cache line size for alignment optimizations (64 bytes on most modern CPUs)
pub const CACHE_LINE_SIZE: usize = 64;

/// Sequence padding alignment; two cache lines to cover adjacent-line prefetch
pub const SEQUENCE_ALIGNMENT: usize = 2 * CACHE_LINE_SIZE;

/// Initial value of every sequence, so the first written slot is index 0
pub const INITIAL_SEQUENCE_VALUE: i64 = -1;

/// Capacity of a room's outgoing channel (broker subscription -> fan-out)
pub const ROOM_OUTGOING_CAPACITY: usize = 1000;

/// Capacity of the rendezvous channels on the ingress path
///
/// The original design used unbuffered channels; capacity 1 is the closest
/// bounded equivalent and preserves the per-publisher ordering chain.
pub const INGRESS_CHANNEL_CAPACITY: usize = 1;

/// How long an idle drainer sleeps before re-checking its consumer
pub const DRAIN_IDLE_WAIT: Duration = Duration::from_secs(1);

/// Interval between per-room status reports
pub const STATUS_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Interval between reaper passes over empty rooms
pub const ROOM_REAP_INTERVAL: Duration = Duration::from_secs(120);

/// Interval between blacklist file reloads
pub const BLACKLIST_RELOAD_INTERVAL: Duration = Duration::from_secs(120);

/// Interval between broker pool health checks
pub const POOL_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// TCP keepalive period on accepted client sockets
pub const KEEPALIVE_PERIOD: Duration = Duration::from_secs(120);

/// Wait between broker reconnect attempts
pub const BROKER_RECONNECT_WAIT: Duration = Duration::from_secs(2);

/// Maximum reconnect attempts per underlying broker client
pub const BROKER_MAX_RECONNECTS: usize = 5;

/// Broker ping interval
pub const BROKER_PING_INTERVAL: Duration = Duration::from_secs(20);

/// Minimum (and default) number of connections in the broker pool
pub const DEFAULT_POOL_CONNECTIONS: usize = 2;

/// File name of the blacklist table inside the filter directory
pub const BLACKLIST_FILE_NAME: &str = "blacklist.json";

/// Validate that the constants are consistent with each other
pub fn validate_constants() -> Result<(), &'static str> {
    if !DEFAULT_RING_BUFFER_SIZE.is_power_of_two() {
        return Err("DEFAULT_RING_BUFFER_SIZE must be a power of 2");
    }
    if MAX_LINE_LENGTH == 0 {
        return Err("MAX_LINE_LENGTH must be greater than 0");
    }
    if ROOM_OUTGOING_CAPACITY == 0 || INGRESS_CHANNEL_CAPACITY == 0 {
        return Err("Channel capacities must be greater than 0");
    }
    if !CACHE_LINE_SIZE.is_power_of_two() || !SEQUENCE_ALIGNMENT.is_power_of_two() {
        return Err("Alignments must be powers of 2");
    }
    if DEFAULT_POOL_CONNECTIONS == 0 {
        return Err("DEFAULT_POOL_CONNECTIONS must be greater than 0");
    }
    Ok(())
}
