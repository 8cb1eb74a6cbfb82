//! Ring descriptor dan encoding flags-nya
//!
//! Satu descriptor per slot. Producer mengisi `addr`/`len` lalu set
//! `DESC_HW`; consumer menimpa `len` lalu clear `DESC_HW`. Siapa pun yang
//! menyerahkan slot menulis `flags` paling akhir.

use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64};

/// Slot belongs to the consumer.
pub const DESC_HW: u16 = 0x80;
/// Generation of the lap the slot was last written in.
pub const DESC_WRAP: u16 = 0x40;
/// Bits a caller may carry through a publish.
pub const DESC_USER_MASK: u16 = 0x3f;

/// A single ring slot in wire layout.
///
/// All fields are atomics so both endpoints can hold `&Descriptor`; they are
/// accessed with `Relaxed` ordering and the endpoints place explicit fences
/// around the `flags` handover.
#[repr(C, align(16))]
#[derive(Debug, Default)]
pub struct Descriptor {
    pub(crate) addr: AtomicU64,
    pub(crate) len: AtomicU32,
    pub(crate) index: AtomicU16,
    pub(crate) flags: AtomicU16,
}

pub const DESCRIPTOR_SIZE: usize = std::mem::size_of::<Descriptor>();

const _: () = assert!(DESCRIPTOR_SIZE == 16);

impl Descriptor {
    pub(crate) fn with_index(index: u16) -> Self {
        Self {
            index: AtomicU16::new(index),
            ..Self::default()
        }
    }
}

/// The wrap bit as seen by one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation(u16);

impl Generation {
    /// Both endpoints start here; the first lap flips it to 0.
    pub const INITIAL: Generation = Generation(DESC_WRAP);

    /// Generation that slots of lap `lap` carry.
    ///
    /// Lap 0 is written with 0 because the producer flips `INITIAL` on its
    /// first visit to slot 0.
    #[inline(always)]
    pub fn of_lap(lap: u16) -> Self {
        if lap & 1 == 0 {
            Generation(0)
        } else {
            Generation(DESC_WRAP)
        }
    }

    #[inline(always)]
    pub fn of_flags(flags: u16) -> Self {
        Generation(flags & DESC_WRAP)
    }

    #[inline(always)]
    pub fn flip(&mut self) {
        self.0 ^= DESC_WRAP;
    }

    #[inline(always)]
    pub fn flipped(self) -> Self {
        Generation(self.0 ^ DESC_WRAP)
    }

    #[inline(always)]
    pub const fn bits(self) -> u16 {
        self.0
    }
}

#[inline(always)]
pub(crate) fn owned_by_consumer(flags: u16) -> bool {
    flags & DESC_HW != 0
}
