//! Consumer endpoint
//!
//! Claim buffer yang sudah di-publish secara berurutan, complete in place,
//! dan call producer hanya jika producer memintanya. Fence pairing ada di
//! module producer.

use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;

use super::descriptor::{owned_by_consumer, Generation};
use super::event::needs_notification;
use super::ring::SharedRing;
use crate::notify::Notifier;

/// Buffer seperti yang di-publish producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claimed {
    pub len: u32,
    pub handle: u64,
    /// Flags as published: `DESC_HW`, the generation and any user bits.
    pub flags: u16,
}

/// The completing side of a ring. `N` calls the producer.
pub struct Consumer<N> {
    ring: Arc<SharedRing>,
    notifier: N,
    /// Next index to claim.
    used_idx: u16,
    /// `used_idx` when the producer was last called.
    called_used_idx: u16,
    /// Generation of the lap `used_idx` is in.
    wrap: Generation,
}

impl<N: Notifier> Consumer<N> {
    pub fn new(ring: Arc<SharedRing>, notifier: N) -> Self {
        Self {
            ring,
            notifier,
            used_idx: 0,
            called_used_idx: u16::MAX,
            // The cursor starts on slot 0, so lap 0 is entered here.
            wrap: Generation::INITIAL.flipped(),
        }
    }

    /// True jika slot di claim cursor sudah di-publish.
    #[inline]
    pub fn has_available_work(&self) -> bool {
        let head = self.ring.slot(self.used_idx);
        owned_by_consumer(self.ring.descriptor(head).flags.load(Ordering::Relaxed))
    }

    /// Claim the next buffer and hand it straight back with its length
    /// unchanged.
    #[inline]
    pub fn claim_and_complete(&mut self) -> Option<Claimed> {
        self.complete_with(|claimed| claimed.len)
    }

    /// Claim the next buffer, let `used_len` decide the length written back
    /// to the producer, and complete it.
    ///
    /// Returns `None` if the next slot is unpublished, or still carries the
    /// previous lap's generation.
    pub fn complete_with<F>(&mut self, used_len: F) -> Option<Claimed>
    where
        F: FnOnce(&Claimed) -> u32,
    {
        let head = self.ring.slot(self.used_idx);
        let desc = self.ring.descriptor(head);
        let flags = desc.flags.load(Ordering::Relaxed);
        if !owned_by_consumer(flags) {
            return None;
        }
        if Generation::of_flags(flags) != self.wrap {
            tracing::trace!(head, flags, wrap = self.wrap.bits(), "claim: stale generation");
            return None;
        }

        // Barrier A: payload is not read before flags.
        fence(Ordering::Acquire);
        let claimed = Claimed {
            len: desc.len.load(Ordering::Relaxed),
            handle: desc.addr.load(Ordering::Relaxed),
            flags,
        };

        // In-order completion: the slot id stays put, so the descriptor is
        // completed in place.
        desc.len.store(used_len(&claimed), Ordering::Relaxed);

        // Barrier B: len is visible before the producer regains ownership.
        fence(Ordering::Release);
        desc.flags.store(self.wrap.bits(), Ordering::Relaxed);

        self.used_idx = self.used_idx.wrapping_add(1);
        if self.ring.slot(self.used_idx) == 0 {
            self.wrap.flip();
        }
        tracing::trace!(head, used = self.used_idx, "completed");
        Some(claimed)
    }

    /// Minta di-kick begitu producer publish di claim cursor.
    ///
    /// Returns `true` if the caller may now block on its doorbell; `false`
    /// means work raced in and the caller should claim instead.
    pub fn request_notify_on_publish(&mut self) -> bool {
        self.ring.events().set_kick_index(self.used_idx);
        // Barrier C
        fence(Ordering::SeqCst);
        !self.has_available_work()
    }

    /// Does nothing, like the producer's: a stale kick index only costs a
    /// spurious kick.
    #[inline(always)]
    pub fn cancel_notify_request(&mut self) {}

    /// Call the producer if its call index was passed since the last call.
    ///
    /// Returns whether the notifier fired.
    pub fn notify_producer_if_needed(&mut self) -> bool {
        // Barrier D: flush the flags writes before reading the call index.
        fence(Ordering::SeqCst);
        let requested = self.ring.events().call_index();
        if !needs_notification(requested, self.used_idx, self.called_used_idx) {
            tracing::trace!(requested, used = self.used_idx, "call suppressed");
            return false;
        }

        self.called_used_idx = self.used_idx;
        tracing::trace!(requested, used = self.used_idx, "call");
        self.notifier.notify();
        true
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn claim_index(&self) -> u16 {
        self.used_idx
    }

    pub fn generation(&self) -> Generation {
        self.wrap
    }

    pub fn ring(&self) -> &Arc<SharedRing> {
        &self.ring
    }
}

impl<N> std::fmt::Debug for Consumer<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("used_idx", &self.used_idx)
            .field("called_used_idx", &self.called_used_idx)
            .field("wrap", &self.wrap)
            .finish()
    }
}
