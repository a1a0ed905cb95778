//! Seqlock slot storage for the ring buffer
//!
//! Each ring position is a sequence-locked cell holding one chat line as
//! inline bytes. The writer bumps the version counter to odd, copies the
//! payload, then bumps it back to even; readers copy the payload and retry
//! if the version moved underneath them. This gives the ring its lossy
//! broadcast semantics without locks and without handing out references
//! into memory a producer may overwrite.

use std::cell::UnsafeCell;
use std::sync::atomic::{ AtomicU64, Ordering };

use crate::constants::MAX_LINE_LENGTH;

/// Inline slot payload: a length-prefixed byte array sized for one line.
///
/// Plain copyable bytes, so a read torn by a concurrent overwrite degrades
/// to garbage data that the version check discards, never to undefined
/// behavior.
#[derive(Clone, Copy)]
struct SlotPayload {
    len: u32,
    bytes: [u8; MAX_LINE_LENGTH],
}

impl SlotPayload {
    const EMPTY: Self = Self {
        len: 0,
        bytes: [0; MAX_LINE_LENGTH],
    };
}

/// One sequence-locked ring position.
///
/// Version semantics: even = stable, odd = write in progress. Distinct
/// producer claims map to distinct positions, so two writers only meet on
/// the same slot after a full ring wrap inside one write; the version
/// protocol keeps even that case memory-safe, at the cost of a possibly
/// torn payload, which the recent-lossy broadcast contract accepts.
#[repr(C, align(64))]
pub struct Slot {
    version: AtomicU64,
    data: UnsafeCell<SlotPayload>,
}

// SAFETY: all cross-thread access to `data` goes through the seqlock
// protocol below; the payload is plain bytes, so a racing copy can tear but
// cannot produce an invalid value, and the version check rejects torn reads.
unsafe impl Sync for Slot {}

impl Slot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self {
            version: AtomicU64::new(0),
            data: UnsafeCell::new(SlotPayload::EMPTY),
        }
    }

    /// Overwrite the slot with `payload`, truncated to the line cap.
    ///
    /// Destructive and silent; the previous occupant is lost.
    pub fn write(&self, payload: &[u8]) {
        let len = payload.len().min(MAX_LINE_LENGTH);

        let v0 = self.version.load(Ordering::Relaxed);
        // Odd version marks the write in progress
        self.version.store(v0.wrapping_add(1), Ordering::Release);

        // SAFETY: the version is odd, so readers spin instead of trusting
        // this copy; bounds are enforced by `len` above. Raw pointers only,
        // so concurrent reader copies stay defined.
        unsafe {
            let dst = self.data.get();
            std::ptr::write_volatile(std::ptr::addr_of_mut!((*dst).len), len as u32);
            let bytes = std::ptr::addr_of_mut!((*dst).bytes) as *mut u8;
            std::ptr::copy_nonoverlapping(payload.as_ptr(), bytes, len);
        }

        self.version.store(v0.wrapping_add(2), Ordering::Release);
    }

    /// Copy out the current payload as a string.
    ///
    /// Spins while a write is in progress and retries torn reads. Payload
    /// bytes are valid UTF-8 in normal operation; a torn slot decodes
    /// lossily rather than failing.
    pub fn read(&self) -> String {
        loop {
            let v1 = self.version.load(Ordering::Acquire);
            if v1 & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }

            // SAFETY: payload is copied out as plain bytes and only used
            // after the version check below confirms no writer interleaved.
            let snapshot = unsafe { std::ptr::read_volatile(self.data.get()) };

            let v2 = self.version.load(Ordering::Acquire);
            if v1 == v2 {
                let len = (snapshot.len as usize).min(MAX_LINE_LENGTH);
                return String::from_utf8_lossy(&snapshot.bytes[..len]).into_owned();
            }

            std::hint::spin_loop();
        }
    }
}

impl Default for Slot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_slot_reads_empty() {
        let slot = Slot::new();
        assert_eq!(slot.read(), "");
    }

    #[test]
    fn test_write_then_read() {
        let slot = Slot::new();
        slot.write(b"hello world");
        assert_eq!(slot.read(), "hello world");
    }

    #[test]
    fn test_overwrite_is_destructive() {
        let slot = Slot::new();
        slot.write(b"first");
        slot.write(b"second");
        assert_eq!(slot.read(), "second");
    }

    #[test]
    fn test_oversized_payload_is_truncated() {
        let slot = Slot::new();
        let big = vec![b'x'; MAX_LINE_LENGTH + 100];
        slot.write(&big);
        assert_eq!(slot.read().len(), MAX_LINE_LENGTH);
    }

    #[test]
    fn test_concurrent_reads_see_complete_values() {
        use std::sync::Arc;

        let slot = Arc::new(Slot::new());
        slot.write(b"aaaa");

        let writer = {
            let slot = Arc::clone(&slot);
            std::thread::spawn(move || {
                for i in 0..10_000u32 {
                    let b = [b'a' + ((i % 4) as u8); 32];
                    slot.write(&b);
                }
            })
        };

        // Every observed value must be one of the written ones, never a mix
        for _ in 0..10_000 {
            let v = slot.read();
            assert!(!v.is_empty());
            let first = v.as_bytes()[0];
            assert!(v.bytes().all(|b| b == first), "torn read observed: {v:?}");
        }

        writer.join().unwrap();
    }
}
