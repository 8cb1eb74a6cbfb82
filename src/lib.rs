//! descring - lock-free SPSC descriptor ring
//!
//! Arsitektur:
//! - Shared descriptor ring dengan bit ownership dan wrap, flags ditulis terakhir
//! - Endpoint producer dan consumer yang tidak pernah memanggil satu sama lain
//! - Event-index notification suppression di kedua arah
//! - Backing di heap atau shared memory

pub mod affinity;
pub mod config;
pub mod core;
pub mod error;
pub mod notify;

pub use crate::config::RingConfig;
pub use crate::core::{
    needs_notification, Claimed, Consumer, Producer, Reclaimed, Session, SharedRing,
};
pub use crate::error::{Error, RingFull};
pub use crate::notify::{mio_pair, CountingNotifier, MioNotifier, MioWaiter, NoopNotifier, Notifier};
