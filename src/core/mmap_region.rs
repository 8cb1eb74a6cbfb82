//! Memory-mapped ring region untuk endpoint di process berbeda
//!
//! File layout (native endianness):
//!
//! ```text
//! 0     RegionHeader   magic, version, capacity (64 bytes, padded to 128)
//! 128   EventBlock     kick_index @ +0, call_index @ +128
//! 384   Descriptor[capacity]   16 bytes each
//! ```
//!
//! Kedua sisi me-map file yang sama; page-nya shared, jadi atomics dan
//! fences bekerja persis seperti di heap.

use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use super::descriptor::{Descriptor, DESCRIPTOR_SIZE};
use super::event::{EventBlock, EVENT_BLOCK_SIZE, EVENT_PADDING};
use crate::config::validate_capacity;
use crate::error::Error;

/// Header at offset 0. `magic` ditulis paling akhir (`Release`); attacher
/// membacanya dengan `Acquire` sebelum menyentuh field lain.
#[repr(C, align(64))]
struct RegionHeader {
    magic: AtomicU64,
    version: u32,
    capacity: u32,
    _reserved: [u8; 48],
}

const MAGIC: u64 = u64::from_le_bytes(*b"DESCRING");
const VERSION: u32 = 1;
const HEADER_SIZE: usize = std::mem::size_of::<RegionHeader>();
const EVENT_OFFSET: usize = EVENT_PADDING;
const DESC_OFFSET: usize = EVENT_OFFSET + EVENT_BLOCK_SIZE;

const _: () = assert!(HEADER_SIZE == 64);
const _: () = assert!(HEADER_SIZE <= EVENT_OFFSET);
const _: () = assert!(DESC_OFFSET % std::mem::align_of::<Descriptor>() == 0);

/// Total file length for a ring of `capacity` slots.
pub fn region_len(capacity: usize) -> usize {
    DESC_OFFSET + capacity * DESCRIPTOR_SIZE
}

/// A mapped ring region.
pub struct MappedRegion {
    mmap: MmapMut,
    capacity: usize,
    path: PathBuf,
}

impl MappedRegion {
    /// Create (or truncate and recreate) the region at `path`.
    ///
    /// Descriptors get their slot ids, everything else starts zeroed.
    pub fn create<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self, Error> {
        validate_capacity(capacity)?;
        let path = path.as_ref();
        let len = region_len(capacity);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(len as u64)?;

        let mut mmap = map(&file, len)?;

        let header = mmap.as_mut_ptr() as *mut RegionHeader;
        // SAFETY: The mapping is page aligned and at least HEADER_SIZE long.
        // Nobody reads version or capacity before magic is published.
        unsafe {
            (*header).version = VERSION;
            (*header).capacity = capacity as u32;
        }

        let region = Self {
            mmap,
            capacity,
            path: path.to_path_buf(),
        };
        for (slot, desc) in region.descriptors().iter().enumerate() {
            desc.index.store(slot as u16, Ordering::Relaxed);
        }

        // Magic last: an attacher that sees it sees an initialised ring.
        region.header().magic.store(MAGIC, Ordering::Release);

        tracing::debug!(path = %path.display(), capacity, len, "created shared ring region");
        Ok(region)
    }

    /// Map an existing region created by [`MappedRegion::create`].
    pub fn attach<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let mismatch = |reason: String| Error::LayoutMismatch {
            path: path.to_path_buf(),
            reason,
        };

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let file_len = file.metadata()?.len() as usize;
        if file_len < DESC_OFFSET {
            return Err(mismatch(format!("file is {file_len} bytes, smaller than the header")));
        }

        let mmap = map(&file, file_len)?;

        // SAFETY: The mapping is page aligned and at least DESC_OFFSET long.
        let header = unsafe { &*(mmap.as_ptr() as *const RegionHeader) };
        // Pairs with the Release store in `create`.
        let magic = header.magic.load(Ordering::Acquire);
        if magic != MAGIC {
            return Err(mismatch(format!("bad magic {magic:#018x}")));
        }
        let (version, capacity) = (header.version, header.capacity);
        if version != VERSION {
            return Err(mismatch(format!("version {version} (expected {VERSION})")));
        }
        let capacity = capacity as usize;
        validate_capacity(capacity).map_err(|e| mismatch(e.to_string()))?;
        if file_len != region_len(capacity) {
            return Err(mismatch(format!(
                "file is {file_len} bytes, capacity {capacity} needs {}",
                region_len(capacity)
            )));
        }

        tracing::debug!(path = %path.display(), capacity, "attached shared ring region");
        Ok(Self {
            mmap,
            capacity,
            path: path.to_path_buf(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn header(&self) -> &RegionHeader {
        // SAFETY: Offset 0 of a page-aligned mapping at least DESC_OFFSET long.
        unsafe { &*(self.mmap.as_ptr() as *const RegionHeader) }
    }

    pub(crate) fn events(&self) -> &EventBlock {
        // SAFETY: EVENT_OFFSET is 128-aligned within a page-aligned mapping,
        // and EventBlock is all atomics, so shared references are sound.
        unsafe { &*(self.mmap.as_ptr().add(EVENT_OFFSET) as *const EventBlock) }
    }

    pub(crate) fn descriptors(&self) -> &[Descriptor] {
        // SAFETY: The length was validated against capacity, DESC_OFFSET is
        // 16-aligned, and Descriptor is all atomics.
        unsafe {
            std::slice::from_raw_parts(
                self.mmap.as_ptr().add(DESC_OFFSET) as *const Descriptor,
                self.capacity,
            )
        }
    }
}

fn map(file: &File, len: usize) -> Result<MmapMut, Error> {
    // SAFETY: The file is opened read/write and sized; concurrent writers are
    // the peer endpoint, which only touches it through atomics.
    let mmap = unsafe { MmapOptions::new().len(len).map_mut(file)? };
    Ok(mmap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread;
    use std::time::{Duration, Instant};

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("descring-{}-{}.shm", name, std::process::id()))
    }

    #[test]
    fn test_create_and_attach() {
        let path = scratch("create-attach");

        {
            let created = MappedRegion::create(&path, 8).unwrap();
            assert_eq!(created.capacity(), 8);
            for (i, d) in created.descriptors().iter().enumerate() {
                assert_eq!(d.index.load(Ordering::Relaxed) as usize, i);
            }

            let attached = MappedRegion::attach(&path).unwrap();
            assert_eq!(attached.capacity(), 8);

            // Writes through one mapping are visible through the other.
            created.events().set_kick_index(42);
            assert_eq!(attached.events().kick_index(), 42);
            created.descriptors()[3].len.store(99, Ordering::Relaxed);
            assert_eq!(attached.descriptors()[3].len.load(Ordering::Relaxed), 99);
        }

        assert_eq!(fs::metadata(&path).unwrap().len() as usize, region_len(8));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_attach_racing_create_sees_slot_ids() {
        const CAPACITY: usize = 1024;

        for round in 0..20 {
            let path = scratch(&format!("race-{round}"));
            fs::remove_file(&path).ok();

            let attacher = {
                let path = path.clone();
                thread::spawn(move || {
                    let deadline = Instant::now() + Duration::from_secs(10);
                    loop {
                        match MappedRegion::attach(&path) {
                            Ok(region) => return region,
                            // Not there yet, not sized yet, or magic not yet published.
                            Err(Error::Io(_) | Error::LayoutMismatch { .. })
                                if Instant::now() < deadline =>
                            {
                                std::hint::spin_loop()
                            }
                            Err(e) => panic!("attach never succeeded: {e}"),
                        }
                    }
                })
            };

            let created = MappedRegion::create(&path, CAPACITY).unwrap();
            let attached = attacher.join().unwrap();
            assert_eq!(attached.capacity(), CAPACITY);
            for (slot, d) in attached.descriptors().iter().enumerate() {
                assert_eq!(
                    usize::from(d.index.load(Ordering::Relaxed)),
                    slot,
                    "round {round}: slot id not initialised"
                );
            }

            drop((created, attached));
            fs::remove_file(&path).ok();
        }
    }

    #[test]
    fn test_attach_rejects_garbage() {
        let path = scratch("garbage");
        fs::write(&path, vec![0xabu8; region_len(4)]).unwrap();

        let err = MappedRegion::attach(&path).err().unwrap();
        assert!(matches!(err, Error::LayoutMismatch { .. }), "{err}");

        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_attach_rejects_truncated() {
        let path = scratch("truncated");
        drop(MappedRegion::create(&path, 16).unwrap());
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(region_len(8) as u64).unwrap();

        let err = MappedRegion::attach(&path).err().unwrap();
        assert!(matches!(err, Error::LayoutMismatch { .. }), "{err}");

        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_create_rejects_bad_capacity() {
        let path = scratch("bad-capacity");
        assert!(matches!(
            MappedRegion::create(&path, 12),
            Err(Error::InvalidCapacity(12))
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_attach_missing_file() {
        let path = scratch("missing");
        assert!(matches!(MappedRegion::attach(&path), Err(Error::Io(_))));
    }
}
