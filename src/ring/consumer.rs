//! Independent read cursor over a ring buffer
//!
//! Every drainer task owns one `Consumer`. Cursors advance independently,
//! and a reader that falls behind the ring window is snapped forward to the
//! oldest surviving position, silently losing the gap. That is lag
//! recovery, not an error.

use std::sync::Arc;

use tracing::warn;

use crate::ring::ring_buffer::RingBuffer;
use crate::ring::sequence::Sequence;

/// A per-reader cursor over a shared [`RingBuffer`].
///
/// The valid readable range at any instant is `(producer − size, producer]`.
/// Only the owning task advances the cursor.
pub struct Consumer {
    sequence: Sequence,
    ring: Arc<RingBuffer>,
}

impl Consumer {
    /// Create a consumer positioned before the first slot.
    ///
    /// A consumer created this way on a non-empty ring will replay the whole
    /// surviving window; use [`Consumer::attach`] to follow the tail.
    pub fn new(ring: Arc<RingBuffer>) -> Self {
        Self {
            sequence: Sequence::new(),
            ring,
        }
    }

    /// Create a consumer positioned at the current producer cursor, so it
    /// only observes items published after the attach.
    pub fn attach(ring: Arc<RingBuffer>) -> Self {
        let consumer = Self::new(ring);
        consumer.sequence.set(consumer.ring.producer_pos());
        consumer
    }

    /// Move the cursor to an absolute position
    pub fn seek(&self, pos: i64) {
        self.sequence.set(pos);
    }

    /// Current cursor position
    pub fn position(&self) -> i64 {
        self.sequence.get()
    }

    /// Number of items currently readable, clamped to the ring size
    pub fn len(&self) -> i64 {
        let lag = self.ring.producer_pos() - self.sequence.get();
        lag.clamp(0, self.ring.size())
    }

    /// Whether there is nothing to read right now
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compute the readable range, snapping the cursor forward if it has
    /// been lapped. Returns `(consumer_pos, producer_snapshot)`, or `None`
    /// when there is no new data.
    fn prepare_get(&self) -> Option<(i64, i64)> {
        let mut consumer_pos = self.sequence.get();
        let producer_pos = self.ring.producer_pos();

        if consumer_pos >= producer_pos {
            return None;
        }

        // Oldest position still inside the window
        let min_consumer_pos = producer_pos - self.ring.size() + 1;
        if consumer_pos < min_consumer_pos {
            warn!(pos = consumer_pos, oldest = min_consumer_pos, "data was override");
            self.sequence.set(min_consumer_pos - 1);
            consumer_pos = min_consumer_pos - 1;
        }

        Some((consumer_pos, producer_pos))
    }

    /// Read the next item, advancing the cursor by one.
    ///
    /// `None` means the cursor has caught up with the producer.
    pub fn get(&self) -> Option<String> {
        let (consumer_pos, _) = self.prepare_get()?;

        let next_pos = consumer_pos + 1;
        let item = self.ring.slot_at(next_pos);
        self.sequence.add(1);
        Some(item)
    }

    /// Read every currently-readable item in producer order, advancing the
    /// cursor to the producer snapshot. Returns an empty vector when there
    /// is nothing new.
    ///
    /// All reads stay at or below the producer snapshot taken in
    /// `prepare_get`, which is what makes the claim-then-write producer
    /// protocol safe to read against.
    pub fn batch_get(&self) -> Vec<String> {
        let Some((consumer_pos, producer_pos)) = self.prepare_get() else {
            return Vec::new();
        };

        let batch = producer_pos - consumer_pos;
        let mut items = Vec::with_capacity(batch as usize);
        let mut next_pos = consumer_pos + 1;
        for _ in 0..batch {
            items.push(self.ring.slot_at(next_pos));
            next_pos += 1;
        }

        self.sequence.add(batch);
        items
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("position", &self.position())
            .field("ring", &self.ring)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_ring(size: usize, count: i64) -> Arc<RingBuffer> {
        let rb = Arc::new(RingBuffer::with_size(size).unwrap());
        for i in 0..count {
            rb.put(&i.to_string());
        }
        rb
    }

    #[test]
    fn test_get_advances_by_one() {
        let rb = filled_ring(8, 3);
        let c = Consumer::new(rb);

        assert_eq!(c.position(), -1);
        assert_eq!(c.get().as_deref(), Some("0"));
        assert_eq!(c.position(), 0);
        assert_eq!(c.get().as_deref(), Some("1"));
        assert_eq!(c.position(), 1);
    }

    #[test]
    fn test_get_returns_none_when_caught_up() {
        let rb = filled_ring(8, 1);
        let c = Consumer::new(rb);
        assert!(c.get().is_some());
        assert!(c.get().is_none());
        assert!(c.is_empty());
    }

    #[test]
    fn test_batch_get_advances_by_batch_size() {
        let rb = filled_ring(8, 5);
        let c = Consumer::new(rb);

        let items = c.batch_get();
        assert_eq!(items, vec!["0", "1", "2", "3", "4"]);
        assert_eq!(c.position(), 4);
        assert!(c.batch_get().is_empty());
    }

    #[test]
    fn test_len_is_clamped_to_ring_size() {
        let rb = filled_ring(4, 100);
        let c = Consumer::new(rb);
        assert_eq!(c.len(), 4);
    }

    #[test]
    fn test_lagged_consumer_snaps_forward() {
        // Ring of 4, ten puts "0".."9", cursor parked at 0: the window is
        // positions 6..=9, so the batch is the last four items.
        let rb = filled_ring(4, 10);
        let c = Consumer::new(rb);
        c.seek(0);

        let items = c.batch_get();
        assert_eq!(items, vec!["6", "7", "8", "9"]);
        assert_eq!(c.position(), 9);
    }

    #[test]
    fn test_lagged_get_never_returns_outside_window() {
        let rb = filled_ring(4, 20);
        let c = Consumer::new(rb);
        c.seek(2);

        // producer = 19, window is (15, 19]; the snapped read starts at 16
        assert_eq!(c.get().as_deref(), Some("16"));
    }

    #[test]
    fn test_attach_sees_only_new_items() {
        let rb = filled_ring(8, 5);
        let c = Consumer::attach(Arc::clone(&rb));
        assert!(c.batch_get().is_empty());

        rb.put("fresh");
        assert_eq!(c.batch_get(), vec!["fresh"]);
    }

    #[test]
    fn test_independent_cursors() {
        let rb = filled_ring(8, 4);
        let a = Consumer::new(Arc::clone(&rb));
        let b = Consumer::new(rb);

        assert_eq!(a.batch_get().len(), 4);
        // b's cursor is untouched by a's reads
        assert_eq!(b.batch_get().len(), 4);
    }
}
