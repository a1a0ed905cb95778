//! Lock-free broadcast ring: the core of the per-room pipeline
//!
//! A disruptor-style ring buffer specialized for recent-lossy broadcast:
//!
//! - **Lock-free**: the producer cursor is a CAS-claimed atomic sequence;
//!   slots are seqlock cells
//! - **Independent readers**: every consumer owns its cursor and paces
//!   itself
//! - **No backpressure**: a lagging reader is snapped forward over the gap
//!   instead of ever stalling a writer
//! - **Cache-friendly**: sequences are padded to a cache-line pair, slots
//!   are cache-line aligned
//!
//! The room fan-out task is the single producer in practice; the CAS claim
//! keeps the ring correct if ingest ever grows more sources.

pub mod consumer;
pub mod ring_buffer;
pub mod sequence;
pub mod slot;

pub use consumer::Consumer;
pub use ring_buffer::RingBuffer;
pub use sequence::Sequence;
