//! Shadow tiap slot di sisi producer.
//!
//! Consumer boleh menulis ulang payload descriptor sebelum mengembalikannya,
//! jadi producer menyimpan salinan handle buffer dan tag milik caller,
//! di-index dengan slot id.

use crate::error::Error;

#[derive(Debug)]
pub(crate) struct ShadowEntry<T> {
    pub(crate) handle: u64,
    pub(crate) tag: T,
}

#[derive(Debug)]
pub(crate) struct ShadowTable<T> {
    entries: Box<[Option<ShadowEntry<T>>]>,
}

impl<T> ShadowTable<T> {
    /// All entries start empty.
    pub(crate) fn allocate(capacity: usize) -> Result<Self, Error> {
        let mut entries = Vec::new();
        entries
            .try_reserve_exact(capacity)
            .map_err(|_| Error::Alloc { what: "shadow table", capacity })?;
        entries.resize_with(capacity, || None);
        Ok(Self {
            entries: entries.into_boxed_slice(),
        })
    }

    #[inline(always)]
    pub(crate) fn fill(&mut self, slot_id: usize, handle: u64, tag: T) {
        let previous = self.entries[slot_id].replace(ShadowEntry { handle, tag });
        debug_assert!(previous.is_none(), "shadow slot {slot_id} still in flight");
    }

    #[inline(always)]
    pub(crate) fn take(&mut self, slot_id: usize) -> Option<ShadowEntry<T>> {
        self.entries[slot_id].take()
    }

    #[cfg(test)]
    pub(crate) fn occupied(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }
}
