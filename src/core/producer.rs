//! Producer endpoint
//!
//! Publish buffer ke ring, reclaim setelah consumer selesai, dan kick
//! consumer hanya jika consumer memintanya.
//!
//! Fence pairing dengan consumer:
//! - A: release before writing `flags` in [`Producer::publish`], acquire
//!   after reading them in `Consumer::claim_and_complete`.
//! - B: release before the consumer clears `DESC_HW`, acquire in
//!   [`Producer::reclaim`].
//! - C: full fence after the consumer arms `kick_index`, full fence in
//!   [`Producer::notify_consumer_if_needed`].
//! - D: full fence in [`Producer::request_notify_on_completion`], full fence
//!   before the consumer reads `call_index`.

use std::sync::atomic::{compiler_fence, fence, Ordering};
use std::sync::Arc;

use super::descriptor::{owned_by_consumer, Generation, DESC_HW, DESC_USER_MASK};
use super::event::needs_notification;
use super::ring::SharedRing;
use super::shadow::ShadowTable;
use crate::error::{Error, RingFull};
use crate::notify::Notifier;

/// Buffer yang dikembalikan consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reclaimed<T> {
    /// The tag passed to `publish`.
    pub tag: T,
    /// The handle passed to `publish`, from the shadow table.
    pub handle: u64,
    /// Length as written back by the consumer.
    pub len: u32,
    /// Flags as left by the consumer.
    pub flags: u16,
}

/// The publishing side of a ring.
///
/// `T` is an opaque per-buffer tag returned by [`Producer::reclaim`].
/// `N` kicks the consumer.
pub struct Producer<T, N> {
    ring: Arc<SharedRing>,
    shadow: ShadowTable<T>,
    notifier: N,
    /// Next index to publish at.
    avail_idx: u16,
    /// Next index to reclaim at.
    last_used_idx: u16,
    num_free: usize,
    /// `avail_idx` when the consumer was last kicked.
    kicked_avail_idx: u16,
    wrap: Generation,
}

impl<T, N: Notifier> Producer<T, N> {
    /// Membuat producer untuk ring yang baru diinisialisasi.
    pub fn new(ring: Arc<SharedRing>, notifier: N) -> Result<Self, Error> {
        let shadow = ShadowTable::allocate(ring.capacity())?;
        Ok(Self::with_shadow(ring, shadow, notifier))
    }

    pub(crate) fn with_shadow(ring: Arc<SharedRing>, shadow: ShadowTable<T>, notifier: N) -> Self {
        let num_free = ring.capacity();
        Self {
            ring,
            shadow,
            notifier,
            avail_idx: 0,
            last_used_idx: 0,
            num_free,
            kicked_avail_idx: u16::MAX,
            wrap: Generation::INITIAL,
        }
    }

    /// Publish a buffer to the consumer.
    ///
    /// Returns the slot it landed in, or hands `tag` back if every slot is
    /// in flight. Only the [`DESC_USER_MASK`] bits of `extra_flags` are
    /// carried.
    #[inline]
    pub fn publish(
        &mut self,
        len: u32,
        handle: u64,
        tag: T,
        extra_flags: u16,
    ) -> Result<usize, RingFull<T>> {
        if self.num_free == 0 {
            tracing::trace!(
                last_used = self.last_used_idx,
                avail = self.avail_idx,
                "publish: ring full"
            );
            return Err(RingFull(tag));
        }

        self.num_free -= 1;
        let head = self.ring.slot(self.avail_idx);
        self.avail_idx = self.avail_idx.wrapping_add(1);
        if head == 0 {
            self.wrap.flip();
        }

        let desc = self.ring.descriptor(head);
        // Start with the payload writes so the line is fetched exclusive
        // rather than shared with a consumer polling `flags`.
        desc.addr.store(handle, Ordering::Relaxed);
        desc.len.store(len, Ordering::Relaxed);
        compiler_fence(Ordering::SeqCst);
        let id = self.ring.slot(desc.index.load(Ordering::Relaxed));
        self.shadow.fill(id, handle, tag);

        // Barrier A
        fence(Ordering::Release);
        desc.flags.store(
            DESC_HW | self.wrap.bits() | (extra_flags & DESC_USER_MASK),
            Ordering::Relaxed,
        );
        tracing::trace!(head, avail = self.avail_idx, wrap = self.wrap.bits(), "published");
        Ok(head)
    }

    /// Ambil kembali buffer tertua jika consumer sudah menyelesaikannya.
    #[inline]
    pub fn reclaim(&mut self) -> Option<Reclaimed<T>> {
        if self.outstanding() == 0 {
            return None;
        }

        let head = self.ring.slot(self.last_used_idx);
        let desc = self.ring.descriptor(head);
        if owned_by_consumer(desc.flags.load(Ordering::Relaxed)) {
            tracing::trace!(head, "reclaim: still owned by consumer");
            return None;
        }

        // Barrier B
        fence(Ordering::Acquire);
        let len = desc.len.load(Ordering::Relaxed);
        let flags = desc.flags.load(Ordering::Relaxed);
        debug_assert_eq!(
            Generation::of_flags(flags),
            self.read_generation(),
            "completed slot {head} carries a stale generation"
        );
        let id = self.ring.slot(desc.index.load(Ordering::Relaxed));
        let entry = self.shadow.take(id)?;

        self.num_free += 1;
        self.last_used_idx = self.last_used_idx.wrapping_add(1);
        Some(Reclaimed {
            tag: entry.tag,
            handle: entry.handle,
            len,
            flags,
        })
    }

    /// True while the oldest in-flight buffer is still with the consumer,
    /// i.e. nothing can be reclaimed yet and it is safe to wait for a call.
    ///
    /// The expected generation is derived from the read cursor; the producer
    /// published that slot itself, so it never needs the consumer's state.
    #[inline]
    pub fn completions_pending(&self) -> bool {
        let head = self.ring.slot(self.last_used_idx);
        let flags = self.ring.descriptor(head).flags.load(Ordering::Relaxed);
        owned_by_consumer(flags) && Generation::of_flags(flags) == self.read_generation()
    }

    /// Ask to be called once the consumer completes the buffer at the read
    /// cursor.
    ///
    /// Returns `true` if the caller may now block on its doorbell; `false`
    /// means a completion raced in and the caller should reclaim instead.
    pub fn request_notify_on_completion(&mut self) -> bool {
        self.ring.events().set_call_index(self.last_used_idx);
        // Barrier D: flush the call index before re-checking.
        fence(Ordering::SeqCst);
        self.completions_pending()
    }

    /// Does nothing: leaving the call index armed costs at most a spurious
    /// call, clearing it would cost a cache miss on every toggle.
    #[inline(always)]
    pub fn cancel_notify_request(&mut self) {}

    /// Kick the consumer if its kick index was passed since the last kick.
    ///
    /// Returns whether the notifier fired.
    pub fn notify_consumer_if_needed(&mut self) -> bool {
        // Barrier C: flush the flags writes before reading the kick index.
        fence(Ordering::SeqCst);
        let requested = self.ring.events().kick_index();
        if !needs_notification(requested, self.avail_idx, self.kicked_avail_idx) {
            tracing::trace!(requested, avail = self.avail_idx, "kick suppressed");
            return false;
        }

        self.kicked_avail_idx = self.avail_idx;
        tracing::trace!(requested, avail = self.avail_idx, "kick");
        self.notifier.notify();
        true
    }

    #[inline(always)]
    fn read_generation(&self) -> Generation {
        Generation::of_lap(self.ring.lap(self.last_used_idx))
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn free_slots(&self) -> usize {
        self.num_free
    }

    /// Buffer yang sudah di-publish tapi belum di-reclaim.
    pub fn outstanding(&self) -> usize {
        self.ring.capacity() - self.num_free
    }

    pub fn publish_index(&self) -> u16 {
        self.avail_idx
    }

    pub fn generation(&self) -> Generation {
        self.wrap
    }

    pub fn ring(&self) -> &Arc<SharedRing> {
        &self.ring
    }
}

impl<T, N> std::fmt::Debug for Producer<T, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("avail_idx", &self.avail_idx)
            .field("last_used_idx", &self.last_used_idx)
            .field("num_free", &self.num_free)
            .field("kicked_avail_idx", &self.kicked_avail_idx)
            .field("wrap", &self.wrap)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::descriptor::DESC_WRAP;
    use crate::notify::CountingNotifier;

    fn producer(capacity: usize) -> (Producer<u32, CountingNotifier>, CountingNotifier) {
        let ring = Arc::new(SharedRing::allocate(capacity).unwrap());
        let kicks = CountingNotifier::new();
        (Producer::new(ring, kicks.clone()).unwrap(), kicks)
    }

    /// Stand-in for the consumer: complete `slot` with `generation`.
    fn complete(ring: &SharedRing, slot: usize, generation: u16) {
        fence(Ordering::Release);
        ring.descriptor(slot).flags.store(generation, Ordering::Relaxed);
    }

    #[test]
    fn test_publish_until_full() {
        let (mut p, _) = producer(4);
        for i in 0..4 {
            assert_eq!(p.publish(64, 0x1000 + i as u64, i, 0).unwrap(), i as usize);
        }
        assert_eq!(p.free_slots(), 0);
        assert_eq!(p.outstanding(), 4);

        let rejected = p.publish(64, 0x2000, 99, 0).unwrap_err();
        assert_eq!(rejected.into_inner(), 99);
        assert_eq!(p.shadow.occupied(), 4);
    }

    #[test]
    fn test_publish_writes_flags_last_with_generation() {
        let (mut p, _) = producer(2);
        p.publish(10, 0xaa, 0, 0x05).unwrap();

        let desc = p.ring.descriptor(0);
        assert_eq!(desc.addr.load(Ordering::Relaxed), 0xaa);
        assert_eq!(desc.len.load(Ordering::Relaxed), 10);
        // First lap is generation 0; user bits carried, protocol bits masked.
        assert_eq!(desc.flags.load(Ordering::Relaxed), DESC_HW | 0x05);

        p.publish(10, 0xbb, 1, DESC_HW | DESC_WRAP).unwrap();
        assert_eq!(p.ring.descriptor(1).flags.load(Ordering::Relaxed), DESC_HW);
    }

    #[test]
    fn test_reclaim_nothing_outstanding() {
        let (mut p, _) = producer(4);
        // Fresh slots have DESC_HW clear but were never published.
        assert!(p.reclaim().is_none());
        assert!(!p.completions_pending());
    }

    #[test]
    fn test_reclaim_waits_for_consumer() {
        let (mut p, _) = producer(4);
        p.publish(8, 0xabc, 7, 0).unwrap();
        assert!(p.completions_pending());
        assert!(p.reclaim().is_none());

        p.ring.descriptor(0).len.store(3, Ordering::Relaxed);
        p.ring.descriptor(0).addr.store(0, Ordering::Relaxed);
        complete(&p.ring, 0, 0);
        assert!(!p.completions_pending());

        let r = p.reclaim().unwrap();
        assert_eq!(r.tag, 7);
        // Handle comes from the shadow table, not the rewritten descriptor.
        assert_eq!(r.handle, 0xabc);
        assert_eq!(r.len, 3);
        assert_eq!(r.flags, 0);
        assert_eq!(p.free_slots(), 4);
        assert_eq!(p.shadow.occupied(), 0);
    }

    #[test]
    fn test_generation_flips_once_per_lap() {
        let (mut p, _) = producer(4);
        assert_eq!(p.generation(), Generation::INITIAL);
        for lap in 0u16..3 {
            for i in 0..4 {
                let slot = p.publish(1, 0, i, 0).unwrap();
                assert_eq!(p.generation(), Generation::of_lap(lap));
                complete(&p.ring, slot, Generation::of_lap(lap).bits());
            }
            for _ in 0..4 {
                assert!(p.reclaim().is_some());
            }
        }
    }

    #[test]
    fn test_request_notify_on_completion() {
        let (mut p, _) = producer(4);
        p.publish(1, 0, 0, 0).unwrap();
        p.publish(1, 0, 1, 0).unwrap();
        complete(&p.ring, 0, 0);
        p.reclaim().unwrap();

        // Slot 1 still with the consumer: arm and sleep.
        assert!(p.request_notify_on_completion());
        assert_eq!(p.ring.events().call_index(), 1);

        // Completion raced in: do not sleep.
        complete(&p.ring, 1, 0);
        assert!(!p.request_notify_on_completion());
        p.cancel_notify_request();
        assert_eq!(p.ring.events().call_index(), 1);
    }

    #[test]
    fn test_kick_only_when_requested() {
        let (mut p, kicks) = producer(8);

        // Consumer armed at 0 during setup: first publish kicks.
        p.publish(1, 0, 0, 0).unwrap();
        assert!(p.notify_consumer_if_needed());
        assert_eq!(kicks.count(), 1);

        // Consumer has not re-armed: further publishes stay silent.
        p.publish(1, 0, 1, 0).unwrap();
        p.publish(1, 0, 2, 0).unwrap();
        assert!(!p.notify_consumer_if_needed());
        assert_eq!(kicks.count(), 1);

        // Consumer re-arms at 3, the next publish passes it.
        p.ring.events().set_kick_index(3);
        assert!(!p.notify_consumer_if_needed());
        p.publish(1, 0, 3, 0).unwrap();
        assert!(p.notify_consumer_if_needed());
        assert_eq!(kicks.count(), 2);
    }
}
