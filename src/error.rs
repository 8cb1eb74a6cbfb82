//! Error types.
//!
//! Hanya setup session yang bisa gagal. Ring penuh atau slot kosong bukan
//! error: `publish` mengembalikan tag lewat [`RingFull`], dan jalur
//! claim/reclaim mengembalikan `None`.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Largest supported ring: indices are 16 bits wide and every lap must fit
/// an even number of times into the index space.
pub const MAX_CAPACITY: usize = 1 << 15;

/// Fatal setup errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("ring capacity {0} must be a power of two between 1 and {max}", max = MAX_CAPACITY)]
    InvalidCapacity(usize),

    #[error("unable to allocate {what} for {capacity} slots")]
    Alloc { what: &'static str, capacity: usize },

    #[error("{}: shared ring layout mismatch: {reason}", .path.display())]
    LayoutMismatch { path: PathBuf, reason: String },

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// The ring had no free slot; the rejected tag is handed back for a retry.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RingFull<T>(pub T);

impl<T> RingFull<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for RingFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RingFull(..)")
    }
}

impl<T> fmt::Display for RingFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ring is full")
    }
}

impl<T> std::error::Error for RingFull<T> {}
