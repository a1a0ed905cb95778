//! Cache-line padded atomic sequence counter

use std::sync::atomic::{ AtomicI64, Ordering };

use crate::constants::INITIAL_SEQUENCE_VALUE;

/// Atomic signed 64-bit cursor, padded to prevent false sharing.
///
/// Uses 128-byte alignment to keep a sequence alone on the cache-line pair
/// that modern Intel CPUs prefetch together. The producer cursor of a ring
/// and the read cursor of every consumer are each one of these; padding keeps
/// a hot producer from invalidating consumer lines and vice versa.
///
/// The initial value is −1 so that the first claimed position is 0.
#[repr(align(128))]
pub struct Sequence {
    cursor: AtomicI64,
    _padding: [u8; 128 - 8],
}

impl Sequence {
    /// Create a sequence at the initial position (−1)
    pub fn new() -> Self {
        Self::with_value(INITIAL_SEQUENCE_VALUE)
    }

    /// Create a sequence at an arbitrary position
    pub fn with_value(value: i64) -> Self {
        Self {
            cursor: AtomicI64::new(value),
            _padding: [0; 128 - 8],
        }
    }

    /// Atomically load the current position
    #[inline]
    pub fn get(&self) -> i64 {
        self.cursor.load(Ordering::Acquire)
    }

    /// Atomically store a new position
    #[inline]
    pub fn set(&self, value: i64) {
        self.cursor.store(value, Ordering::Release);
    }

    /// Atomically advance the position by `delta`
    #[inline]
    pub fn add(&self, delta: i64) {
        self.cursor.fetch_add(delta, Ordering::AcqRel);
    }

    /// Atomically replace `old` with `new`; returns whether the swap happened
    #[inline]
    pub fn compare_and_swap(&self, old: i64, new: i64) -> bool {
        self.cursor
            .compare_exchange(old, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Sequence").field(&self.get()).finish()
    }
}

// The padding is a layout guarantee, not a tuning knob.
static_assertions::const_assert_eq!(std::mem::align_of::<Sequence>(), 128);
static_assertions::const_assert!(std::mem::size_of::<Sequence>() >= 128);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_value() {
        let seq = Sequence::new();
        assert_eq!(seq.get(), -1);
    }

    #[test]
    fn test_set_and_add() {
        let seq = Sequence::new();
        seq.set(10);
        assert_eq!(seq.get(), 10);
        seq.add(3);
        assert_eq!(seq.get(), 13);
    }

    #[test]
    fn test_compare_and_swap() {
        let seq = Sequence::new();
        assert!(seq.compare_and_swap(-1, 0));
        assert_eq!(seq.get(), 0);

        // Stale expectation must fail and leave the value untouched
        assert!(!seq.compare_and_swap(-1, 5));
        assert_eq!(seq.get(), 0);
    }

    #[test]
    fn test_concurrent_claims_are_unique() {
        use std::sync::Arc;

        let seq = Arc::new(Sequence::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let seq = Arc::clone(&seq);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    loop {
                        let current = seq.get();
                        if seq.compare_and_swap(current, current + 1) {
                            break;
                        }
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(seq.get(), 3999);
    }
}
