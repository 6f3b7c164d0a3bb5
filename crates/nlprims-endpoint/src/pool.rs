use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tracing::trace;

use crate::identity::MAX_PORT;

/// Highest port that fits above the 22-bit pid segment of a 32-bit address.
pub const DEFAULT_MAX_PORT: u32 = MAX_PORT;

/// Errors returned by an [`AddrPool`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Every id in the range is allocated.
    #[error("address pool exhausted (range {min}..={max})")]
    Exhausted { min: u32, max: u32 },

    /// The id is in range but was not allocated.
    #[error("id {0} is not allocated")]
    NotAllocated(u32),

    /// The id is outside the pool range.
    #[error("id {id} outside pool range {min}..={max}")]
    OutOfRange { id: u32, min: u32, max: u32 },
}

/// Which end of the range allocation starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocOrder {
    /// Lowest free id first.
    Ascending,
    /// Highest free id first. Other netlink libraries hand out low port
    /// numbers first, so starting from the top avoids colliding with them.
    #[default]
    Descending,
}

/// Range and direction of an [`AddrPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub min: u32,
    pub max: u32,
    pub order: AllocOrder,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: 0,
            max: DEFAULT_MAX_PORT,
            order: AllocOrder::Descending,
        }
    }
}

/// Pool of small integer ids (endpoint ports) shared by every endpoint in
/// the process.
///
/// `allocate` and `free` run under one mutex. Freed ids are immediately
/// available again.
#[derive(Debug)]
pub struct AddrPool {
    config: PoolConfig,
    used: Mutex<Vec<u64>>,
}

impl AddrPool {
    /// Create a pool. A config with `min > max` is normalised by swapping,
    /// then both bounds are clamped to [`MAX_PORT`] since larger ports do
    /// not fit in an address.
    pub fn new(config: PoolConfig) -> Self {
        let (min, max) = if config.min > config.max {
            (config.max, config.min)
        } else {
            (config.min, config.max)
        };
        let config = PoolConfig {
            min: min.min(MAX_PORT),
            max: max.min(MAX_PORT),
            ..config
        };
        let slots = (config.max - config.min) as usize + 1;
        Self {
            config,
            used: Mutex::new(vec![0; slots.div_ceil(64)]),
        }
    }

    /// The pool shared by every endpoint that is not given its own.
    ///
    /// Created with [`PoolConfig::default`] on first use and kept for the
    /// life of the process.
    pub fn process_wide() -> Arc<AddrPool> {
        static POOL: OnceLock<Arc<AddrPool>> = OnceLock::new();
        Arc::clone(POOL.get_or_init(|| Arc::new(AddrPool::new(PoolConfig::default()))))
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Number of ids in the range.
    pub fn capacity(&self) -> usize {
        (self.config.max - self.config.min) as usize + 1
    }

    /// Take a free id and mark it allocated.
    pub fn allocate(&self) -> Result<u32, PoolError> {
        let mut used = self.used.lock().unwrap_or_else(PoisonError::into_inner);
        let capacity = self.capacity();

        let slot = match self.config.order {
            AllocOrder::Ascending => (0..capacity).find(|&slot| !is_set(&used, slot)),
            AllocOrder::Descending => (0..capacity).rev().find(|&slot| !is_set(&used, slot)),
        };

        let Some(slot) = slot else {
            return Err(PoolError::Exhausted {
                min: self.config.min,
                max: self.config.max,
            });
        };
        set(&mut used, slot, true);
        let id = self.config.min + slot as u32;
        trace!(id, "allocated pool id");
        Ok(id)
    }

    /// Return an allocated id to the pool.
    pub fn free(&self, id: u32) -> Result<(), PoolError> {
        let slot = self.slot(id)?;
        let mut used = self.used.lock().unwrap_or_else(PoisonError::into_inner);
        if !is_set(&used, slot) {
            return Err(PoolError::NotAllocated(id));
        }
        set(&mut used, slot, false);
        trace!(id, "freed pool id");
        Ok(())
    }

    /// Whether `id` is currently allocated. Out-of-range ids never are.
    pub fn is_allocated(&self, id: u32) -> bool {
        match self.slot(id) {
            Ok(slot) => is_set(&self.used.lock().unwrap_or_else(PoisonError::into_inner), slot),
            Err(_) => false,
        }
    }

    /// Number of ids currently allocated.
    pub fn allocated_count(&self) -> usize {
        self.used
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|word| word.count_ones() as usize)
            .sum()
    }

    fn slot(&self, id: u32) -> Result<usize, PoolError> {
        if id < self.config.min || id > self.config.max {
            return Err(PoolError::OutOfRange {
                id,
                min: self.config.min,
                max: self.config.max,
            });
        }
        Ok((id - self.config.min) as usize)
    }
}

impl Default for AddrPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

fn is_set(words: &[u64], slot: usize) -> bool {
    words[slot / 64] & (1 << (slot % 64)) != 0
}

fn set(words: &mut [u64], slot: usize, on: bool) {
    let bit = 1u64 << (slot % 64);
    if on {
        words[slot / 64] |= bit;
    } else {
        words[slot / 64] &= !bit;
    }
}
