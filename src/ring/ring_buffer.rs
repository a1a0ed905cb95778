//! Lossy broadcast ring buffer
//!
//! The per-room broadcast pipeline ends in one of these: a fixed
//! power-of-two array of seqlock slots behind a single CAS-claimed producer
//! cursor. Writers never block and never fail; a full ring silently
//! overwrites the oldest position. Readers attach a [`Consumer`] and
//! tolerate being lapped: the "get the freshest reachable items" contract
//! that keeps a hung socket from ever stalling a room.
//!
//! [`Consumer`]: crate::ring::Consumer

use crate::constants::DEFAULT_RING_BUFFER_SIZE;
use crate::error::{ ChatError, Result };
use crate::ring::sequence::Sequence;
use crate::ring::slot::Slot;

/// Single-cursor, multi-reader lossy ring buffer.
///
/// The producer cursor is claimed with a CAS loop, so any number of writer
/// tasks may share the ring even though a room runs exactly one today.
/// There is no per-slot availability bit; readers detect overwrite purely
/// from cursor arithmetic.
pub struct RingBuffer {
    size: i64,
    mask: i64,
    producer: Sequence,
    buffer: Box<[Slot]>,
}

// A non-power-of-two default would make `new` fall over at runtime
static_assertions::const_assert!(DEFAULT_RING_BUFFER_SIZE.is_power_of_two());

impl RingBuffer {
    /// Create a ring buffer with the default size
    pub fn new() -> Self {
        Self::unchecked(DEFAULT_RING_BUFFER_SIZE)
    }

    /// Create a ring buffer with the given slot count.
    ///
    /// `size` must be a nonzero power of two so that index arithmetic can
    /// use a bit mask.
    pub fn with_size(size: usize) -> Result<Self> {
        if size == 0 || !size.is_power_of_two() {
            return Err(ChatError::config("ring buffer size must be a power of 2"));
        }
        Ok(Self::unchecked(size))
    }

    fn unchecked(size: usize) -> Self {
        let buffer = (0..size).map(|_| Slot::new()).collect::<Vec<_>>().into_boxed_slice();

        Self {
            size: size as i64,
            mask: (size as i64) - 1,
            producer: Sequence::new(),
            buffer,
        }
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.size as usize
    }

    pub(crate) fn size(&self) -> i64 {
        self.size
    }

    /// Current producer position; may be stale by the time the caller uses
    /// it, which the read protocol tolerates.
    pub fn producer_pos(&self) -> i64 {
        self.producer.get()
    }

    /// Publish one item. Never blocks, never fails.
    ///
    /// Claims the next position with a CAS retry loop, then writes the slot.
    /// The write lands after the claim, so readers sample `producer_pos`
    /// first and only trust positions at or below that snapshot.
    pub fn put(&self, item: &str) {
        let mut producer_pos = self.producer.get();
        let mut next_pos = producer_pos + 1;

        while !self.producer.compare_and_swap(producer_pos, next_pos) {
            producer_pos = self.producer.get();
            next_pos = producer_pos + 1;
        }

        self.buffer[(next_pos & self.mask) as usize].write(item.as_bytes());
    }

    /// Read the slot at ring position `pos`
    pub(crate) fn slot_at(&self, pos: i64) -> String {
        self.buffer[(pos & self.mask) as usize].read()
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("size", &self.size)
            .field("producer", &self.producer_pos())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_power_of_two() {
        assert!(RingBuffer::with_size(0).is_err());
        assert!(RingBuffer::with_size(100).is_err());
        assert!(RingBuffer::with_size(512).is_ok());
    }

    #[test]
    fn test_producer_pos_after_m_puts() {
        let rb = RingBuffer::with_size(8).unwrap();
        assert_eq!(rb.producer_pos(), -1);

        for i in 0..20 {
            rb.put(&i.to_string());
        }
        assert_eq!(rb.producer_pos(), 19);
    }

    #[test]
    fn test_window_contents_after_wrap() {
        let rb = RingBuffer::with_size(4).unwrap();
        for i in 0..10 {
            rb.put(&i.to_string());
        }

        // Positions (M - N, M - 1] hold the values written at those positions
        for pos in 6..=9 {
            assert_eq!(rb.slot_at(pos), pos.to_string());
        }
    }

    #[test]
    fn test_overwrite_is_silent_and_destructive() {
        let rb = RingBuffer::with_size(2).unwrap();
        rb.put("a");
        rb.put("b");
        rb.put("c"); // position 2 maps back to index 0, replacing "a"
        assert_eq!(rb.slot_at(2), "c");
        assert_eq!(rb.slot_at(1), "b");
    }

    #[test]
    fn test_concurrent_puts_claim_unique_positions() {
        use std::sync::Arc;

        let rb = Arc::new(RingBuffer::with_size(1024).unwrap());
        let mut handles = Vec::new();
        for t in 0..4 {
            let rb = Arc::clone(&rb);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    rb.put(&format!("{t}-{i}"));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(rb.producer_pos(), 399);
    }
}
