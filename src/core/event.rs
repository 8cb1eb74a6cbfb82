//! Event-index notification suppression
//!
//! Tiap sisi menaruh, di [`EventBlock`], index di mana ia ingin dibangunkan.
//! Peer hanya mengirim signal jika index-nya sudah melewati titik itu sejak
//! signal terakhir, lihat [`needs_notification`].

use std::sync::atomic::{AtomicU16, Ordering};

/// Width of every ring index.
pub const INDEX_BITS: u32 = 16;

/// Padding between the two event indices (two 64-byte lines, to defeat the
/// adjacent-line prefetcher).
pub const EVENT_PADDING: usize = 128;

/// Cache line isolation for one event index.
#[repr(C, align(128))]
#[derive(Debug, Default)]
pub(crate) struct CacheLinePadded<T> {
    pub(crate) value: T,
}

impl<T> CacheLinePadded<T> {
    const fn new(value: T) -> Self {
        Self { value }
    }
}

/// Notification state shared by both endpoints.
///
/// Mostly read: each index has exactly one writer.
#[repr(C)]
#[derive(Debug)]
pub struct EventBlock {
    /// Written by the consumer: kick me once the publish index passes this.
    kick_index: CacheLinePadded<AtomicU16>,
    /// Written by the producer: call me once the claim index passes this.
    call_index: CacheLinePadded<AtomicU16>,
}

pub const EVENT_BLOCK_SIZE: usize = std::mem::size_of::<EventBlock>();

const _: () = assert!(EVENT_BLOCK_SIZE == 2 * EVENT_PADDING);

impl Default for EventBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBlock {
    pub const fn new() -> Self {
        Self {
            kick_index: CacheLinePadded::new(AtomicU16::new(0)),
            call_index: CacheLinePadded::new(AtomicU16::new(0)),
        }
    }

    #[inline(always)]
    pub fn kick_index(&self) -> u16 {
        self.kick_index.value.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub(crate) fn set_kick_index(&self, index: u16) {
        self.kick_index.value.store(index, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn call_index(&self) -> u16 {
        self.call_index.value.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub(crate) fn set_call_index(&self, index: u16) {
        self.call_index.value.store(index, Ordering::Relaxed);
    }
}

/// Distance from `from` forward to `to` in a `bits`-wide index space.
#[inline(always)]
fn forward_distance(modulus: u64, from: u32, to: u32) -> u64 {
    (u64::from(to) + modulus - u64::from(from) % modulus) % modulus
}

/// Tie-break over an index space of `bits` bits (1..=32).
///
/// `current` is the next index the notifying side will write, `last_notified`
/// the value `current` had when it last signalled and `requested` the index
/// the peer asked to be woken after. Returns true iff
///
/// ```text
/// (current - requested - 1) mod 2^bits < (current - last_notified) mod 2^bits
/// ```
///
/// i.e. `requested` lies in the window `[last_notified, current)` counted
/// backwards from `current`. Inputs are reduced modulo `2^bits` first.
///
/// # Panics
/// Panic jika `bits` di luar 1..=32
pub fn needs_notification_in(bits: u32, requested: u32, current: u32, last_notified: u32) -> bool {
    assert!((1..=32).contains(&bits), "index width must be 1..=32 bits");
    let modulus = 1u64 << bits;
    let current = (u64::from(current) % modulus) as u32;
    let since_requested = forward_distance(modulus, requested, current);
    let since_notified = forward_distance(modulus, last_notified, current);
    (since_requested + modulus - 1) % modulus < since_notified
}

/// Tie-break over the ring's 16-bit index space.
///
/// `needs_notification(5, 10, 5)` is true: the peer asked at 5 and nothing
/// was sent since 5. `needs_notification(10, 10, 5)` is false: the peer's
/// index has not been passed yet.
#[inline(always)]
pub fn needs_notification(requested: u16, current: u16, last_notified: u16) -> bool {
    needs_notification_in(
        INDEX_BITS,
        u32::from(requested),
        u32::from(current),
        u32::from(last_notified),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        assert!(needs_notification(5, 10, 5));
        assert!(!needs_notification(10, 10, 5));
        assert!(!needs_notification(0, 0, 0));
        assert!(needs_notification(65535, 2, 65534));
    }

    #[test]
    fn test_requested_at_boundaries() {
        // Window is [last, current).
        assert!(needs_notification(9, 10, 5));
        assert!(!needs_notification(4, 10, 5));
        assert!(!needs_notification(11, 10, 5));
    }

    #[test]
    fn test_initial_state_fires_on_first_publish() {
        // Endpoints start with last_notified = 0xffff and event index 0.
        assert!(!needs_notification(0, 0, 0xffff));
        assert!(needs_notification(0, 1, 0xffff));
    }

    #[test]
    fn test_matches_wrapping_u16_formula() {
        let samples = [0u16, 1, 2, 5, 100, 32767, 32768, 65533, 65534, 65535];
        for &e in &samples {
            for &n in &samples {
                for &p in &samples {
                    let expected = n.wrapping_sub(e).wrapping_sub(1) < n.wrapping_sub(p);
                    assert_eq!(needs_notification(e, n, p), expected, "e={e} n={n} p={p}");
                }
            }
        }
    }

    #[test]
    fn test_exhaustive_small_width_fires_once() {
        // Advancing `current` one step at a time from `last` fires exactly
        // once per window containing `requested`.
        const BITS: u32 = 4;
        const M: u32 = 1 << BITS;
        for requested in 0..M {
            for start in 0..M {
                let mut last = start;
                let mut fired = 0;
                for step in 1..M {
                    let current = (start + step) % M;
                    if needs_notification_in(BITS, requested, current, last) {
                        fired += 1;
                        last = current;
                    }
                }
                let passed = (requested + M - start) % M < M - 1;
                assert_eq!(fired, u32::from(passed), "requested={requested} start={start}");
            }
        }
    }

    #[test]
    fn test_full_32_bit_width() {
        assert!(needs_notification_in(32, u32::MAX, 1, u32::MAX));
        assert!(!needs_notification_in(32, 1, 1, 0));
    }

    #[test]
    #[should_panic(expected = "index width")]
    fn test_zero_width_panics() {
        needs_notification_in(0, 0, 1, 0);
    }

    #[test]
    #[should_panic(expected = "index width")]
    fn test_too_wide_panics() {
        needs_notification_in(33, 0, 1, 0);
    }

    #[test]
    fn test_event_block_layout() {
        let block = EventBlock::new();
        let base = &block as *const EventBlock as usize;
        let kick = &block.kick_index.value as *const AtomicU16 as usize;
        let call = &block.call_index.value as *const AtomicU16 as usize;
        assert_eq!(kick - base, 0);
        assert_eq!(call - base, EVENT_PADDING);
        assert_eq!(std::mem::align_of::<EventBlock>(), EVENT_PADDING);
    }

    #[test]
    fn test_event_block_accessors() {
        let block = EventBlock::default();
        block.set_kick_index(3);
        block.set_call_index(65535);
        assert_eq!(block.kick_index(), 3);
        assert_eq!(block.call_index(), 65535);
    }
}
