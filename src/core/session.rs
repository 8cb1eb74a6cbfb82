//! Satu producer, satu consumer, satu ring.

use std::sync::Arc;

use super::consumer::Consumer;
use super::producer::Producer;
use super::ring::SharedRing;
use super::shadow::ShadowTable;
use crate::config::RingConfig;
use crate::error::Error;
use crate::notify::Notifier;

/// Storage untuk kedua endpoint, dialokasikan di awal.
///
/// ```
/// use descring::{NoopNotifier, RingConfig, Session};
///
/// let session = Session::<&str>::new(&RingConfig::new(4)).unwrap();
/// let (mut producer, mut consumer) = session.split(NoopNotifier, NoopNotifier);
///
/// producer.publish(16, 0x1000, "first", 0).unwrap();
/// let claimed = consumer.claim_and_complete().unwrap();
/// assert_eq!(claimed.len, 16);
/// assert_eq!(producer.reclaim().unwrap().tag, "first");
/// ```
pub struct Session<T> {
    ring: Arc<SharedRing>,
    shadow: ShadowTable<T>,
}

impl<T> Session<T> {
    /// Allocate the ring (on the heap, or in `config.shm_path`) and the
    /// producer's shadow table.
    pub fn new(config: &RingConfig) -> Result<Self, Error> {
        config.validate()?;
        let ring = match &config.shm_path {
            Some(path) => SharedRing::create_mapped(path, config.capacity)?,
            None => SharedRing::allocate(config.capacity)?,
        };
        let shadow = ShadowTable::allocate(config.capacity)?;
        Ok(Self {
            ring: Arc::new(ring),
            shadow,
        })
    }

    pub fn ring(&self) -> &Arc<SharedRing> {
        &self.ring
    }

    /// Hand out the two endpoints. `kick` wakes the consumer, `call` wakes
    /// the producer.
    pub fn split<K: Notifier, C: Notifier>(self, kick: K, call: C) -> (Producer<T, K>, Consumer<C>) {
        let producer = Producer::with_shadow(Arc::clone(&self.ring), self.shadow, kick);
        let consumer = Consumer::new(self.ring, call);
        (producer, consumer)
    }
}
