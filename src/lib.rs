//! Chatring - multi-room TLS chat fan-out server
//!
//! Clients hold long-lived TLS connections, authenticate, join one room and
//! exchange newline-framed text. Rooms map one-to-one onto broker pub/sub
//! topics, so any number of server instances form a single chat fabric; the
//! last hop to each client is a lock-free, recent-lossy ring buffer that
//! never lets a slow socket stall a room.

pub mod broker;
pub mod client;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod filter;
pub mod message;
pub mod ring;
pub mod room;
pub mod server;
pub mod tls;

// Re-export main components
pub use broker::BrokerPool;
pub use config::ServerOptions;
pub use error::{ ChatError, Result };
pub use filter::Blacklist;
pub use message::Message;
pub use ring::{ Consumer, RingBuffer, Sequence };
pub use room::{ Room, RoomHandle };
pub use server::ChatServer;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_ring_pipeline_smoke() {
        let ring = Arc::new(RingBuffer::with_size(512).unwrap());
        let consumer = Consumer::attach(Arc::clone(&ring));

        ring.put("hello");
        ring.put("world");

        assert_eq!(consumer.batch_get(), vec!["hello", "world"]);
        assert_eq!(ring.producer_pos(), 1);
    }

    #[test]
    fn test_constants_are_valid() {
        assert!(constants::validate_constants().is_ok());
    }
}
