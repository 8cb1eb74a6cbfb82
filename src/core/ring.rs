//! Shared ring storage: array descriptor dan event block.
//!
//! Dialokasikan sekali, tidak pernah di-resize. Kedua endpoint memegang
//! `Arc<SharedRing>`; tidak ada yang memilikinya sendiri.

use std::path::Path;
use std::sync::atomic::Ordering;

use super::descriptor::Descriptor;
use super::event::EventBlock;
use super::mmap_region::MappedRegion;
use crate::config::validate_capacity;
use crate::error::Error;

enum Backing {
    Heap {
        events: Box<EventBlock>,
        descriptors: Box<[Descriptor]>,
    },
    Mapped(MappedRegion),
}

/// Descriptor ring plus notification state.
pub struct SharedRing {
    backing: Backing,
    // capacity - 1; capacity is a power of two
    mask: u16,
    // log2(capacity), to get the lap of an index
    lap_shift: u32,
}

impl SharedRing {
    /// Alokasi ring berisi `capacity` slot di heap.
    pub fn allocate(capacity: usize) -> Result<Self, Error> {
        validate_capacity(capacity)?;

        let mut descriptors = Vec::new();
        descriptors
            .try_reserve_exact(capacity)
            .map_err(|_| Error::Alloc { what: "descriptor ring", capacity })?;
        descriptors.extend((0..capacity).map(|slot| Descriptor::with_index(slot as u16)));

        tracing::debug!(capacity, "allocated descriptor ring");
        Ok(Self::with_backing(
            Backing::Heap {
                events: Box::new(EventBlock::new()),
                descriptors: descriptors.into_boxed_slice(),
            },
            capacity,
        ))
    }

    /// Membuat ring baru di file shared memory.
    pub fn create_mapped<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self, Error> {
        let region = MappedRegion::create(path, capacity)?;
        Ok(Self::with_backing(Backing::Mapped(region), capacity))
    }

    /// Map a ring created by [`SharedRing::create_mapped`], possibly in
    /// another process.
    pub fn attach_mapped<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let region = MappedRegion::attach(path)?;
        let capacity = region.capacity();
        Ok(Self::with_backing(Backing::Mapped(region), capacity))
    }

    fn with_backing(backing: Backing, capacity: usize) -> Self {
        Self {
            backing,
            mask: (capacity - 1) as u16,
            lap_shift: capacity.trailing_zeros(),
        }
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        usize::from(self.mask) + 1
    }

    #[inline(always)]
    pub fn is_mapped(&self) -> bool {
        matches!(self.backing, Backing::Mapped(_))
    }

    /// Posisi slot dari free-running index.
    #[inline(always)]
    pub fn slot(&self, index: u16) -> usize {
        usize::from(index & self.mask)
    }

    /// Which lap of the ring a free-running index falls in.
    #[inline(always)]
    pub fn lap(&self, index: u16) -> u16 {
        index >> self.lap_shift
    }

    /// Current flags word of `slot`. For inspection only; the endpoints do
    /// their own fenced reads.
    pub fn flags(&self, slot: usize) -> u16 {
        self.descriptor(slot).flags.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub(crate) fn descriptor(&self, slot: usize) -> &Descriptor {
        &self.descriptors()[slot]
    }

    #[inline(always)]
    pub(crate) fn descriptors(&self) -> &[Descriptor] {
        match &self.backing {
            Backing::Heap { descriptors, .. } => descriptors,
            Backing::Mapped(region) => region.descriptors(),
        }
    }

    #[inline(always)]
    pub fn events(&self) -> &EventBlock {
        match &self.backing {
            Backing::Heap { events, .. } => events,
            Backing::Mapped(region) => region.events(),
        }
    }
}

impl std::fmt::Debug for SharedRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRing")
            .field("capacity", &self.capacity())
            .field("mapped", &self.is_mapped())
            .finish()
    }
}
