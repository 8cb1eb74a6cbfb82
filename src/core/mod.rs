//! Core: descriptor ring dan dua endpoint-nya
//!
//! Prinsip desain:
//! - Lock-free: endpoint hanya berbagi atomics, diurutkan dengan fence eksplisit
//! - Tanpa alokasi setelah init: setiap slot dipakai ulang in place
//! - Event index: tiap sisi hanya di-signal jika memintanya

mod consumer;
mod descriptor;
mod event;
mod mmap_region;
mod producer;
mod ring;
mod session;
mod shadow;

pub use consumer::{Claimed, Consumer};
pub use descriptor::{Descriptor, Generation, DESC_HW, DESC_USER_MASK, DESC_WRAP};
pub use event::{needs_notification, needs_notification_in, EventBlock, INDEX_BITS};
pub use mmap_region::{region_len, MappedRegion};
pub use producer::{Producer, Reclaimed};
pub use ring::SharedRing;
pub use session::Session;
