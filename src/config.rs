//! Konfigurasi session.

use std::path::PathBuf;

use crate::error::{Error, MAX_CAPACITY};

/// Default ring size, matching the classic ringtest driver.
pub const DEFAULT_CAPACITY: usize = 256;

/// How the ring storage is allocated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingConfig {
    /// Number of slots, a power of two.
    pub capacity: usize,
    /// Place descriptors and event indices in this shared-memory file
    /// instead of on the heap.
    pub shm_path: Option<PathBuf>,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            shm_path: None,
        }
    }
}

impl RingConfig {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn with_shm_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.shm_path = Some(path.into());
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        validate_capacity(self.capacity)
    }
}

pub(crate) fn validate_capacity(capacity: usize) -> Result<(), Error> {
    if capacity == 0 || !capacity.is_power_of_two() || capacity > MAX_CAPACITY {
        return Err(Error::InvalidCapacity(capacity));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let config = RingConfig::default();
        assert_eq!(config.capacity, 256);
        assert!(config.shm_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_capacity_bounds() {
        for ok in [1, 2, 4, 1024, MAX_CAPACITY] {
            assert!(RingConfig::new(ok).validate().is_ok(), "{ok}");
        }
        for bad in [0, 3, 6, 1000, MAX_CAPACITY * 2] {
            assert!(
                matches!(RingConfig::new(bad).validate(), Err(Error::InvalidCapacity(c)) if c == bad),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_with_shm_path() {
        let config = RingConfig::new(8).with_shm_path("/dev/shm/ring");
        assert_eq!(config.shm_path, Some(PathBuf::from("/dev/shm/ring")));
    }
}
