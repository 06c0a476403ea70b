// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-capacity slot pools and the decoded-data byte budget.
//!
//! A [`Pool`] hands out [`PoolSlot`] guards from a free list sized once at
//! construction. Holding a slot is what entitles an event, subscription or
//! pending query to exist; dropping the guard puts the index back. Nothing
//! grows at runtime: when the free list is empty, [`Pool::try_acquire`]
//! fails immediately.
//!
//! # Examples
//!
//! ```
//! use ha_hub::pool::Pool;
//!
//! let pool = Pool::new("event", 2);
//! let a = pool.try_acquire().unwrap();
//! let _b = pool.try_acquire().unwrap();
//! assert!(pool.try_acquire().is_err());
//!
//! drop(a);
//! assert_eq!(pool.available(), 1);
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::PoolError;

/// A fixed-capacity slot allocator.
///
/// Cloning a `Pool` yields another handle to the same free list.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    name: &'static str,
    capacity: usize,
    free: Mutex<Vec<usize>>,
}

impl Pool {
    /// Creates a pool with `capacity` slots, all free.
    #[must_use]
    pub fn new(name: &'static str, capacity: usize) -> Self {
        // Reversed so that slot 0 is handed out first.
        let free = (0..capacity).rev().collect();
        Self {
            inner: Arc::new(PoolInner {
                name,
                capacity,
                free: Mutex::new(free),
            }),
        }
    }

    /// Takes a free slot.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Exhausted`] when every slot is in use. Never blocks.
    pub fn try_acquire(&self) -> Result<PoolSlot, PoolError> {
        let index = self.inner.free.lock().pop().ok_or(PoolError::Exhausted {
            pool: self.inner.name,
            capacity: self.inner.capacity,
        })?;
        Ok(PoolSlot {
            pool: Arc::clone(&self.inner),
            index,
        })
    }

    /// Returns the pool name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Returns the total number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Returns the number of free slots.
    #[must_use]
    pub fn available(&self) -> usize {
        self.inner.free.lock().len()
    }

    /// Returns the number of slots currently held.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.inner.capacity - self.available()
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.inner.name)
            .field("capacity", &self.inner.capacity)
            .field("available", &self.available())
            .finish()
    }
}

/// An occupied pool slot. The slot returns to its pool on drop.
pub struct PoolSlot {
    pool: Arc<PoolInner>,
    index: usize,
}

impl PoolSlot {
    /// Returns the slot index inside its pool.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        self.pool.free.lock().push(self.index);
    }
}

impl fmt::Debug for PoolSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PoolSlot({}#{})", self.pool.name, self.index)
    }
}

// ============================================================================
// Data budget
// ============================================================================

/// Byte budget shared by every decoded-data buffer.
///
/// Stands in for the bounded heap the decoded payloads are carved from.
/// A [`DataLease`] accounts for one buffer and gives its bytes back on drop.
#[derive(Clone)]
pub struct DataBudget {
    inner: Arc<BudgetInner>,
}

struct BudgetInner {
    limit: usize,
    used: AtomicUsize,
    peak: AtomicUsize,
}

impl DataBudget {
    /// Creates a budget of `limit` bytes.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(BudgetInner {
                limit,
                used: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    /// Reserves `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NoMemory`] if fewer than `size` bytes remain.
    pub fn try_reserve(&self, size: usize) -> Result<DataLease, PoolError> {
        let limit = self.inner.limit;
        self.inner
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(size).filter(|total| *total <= limit)
            })
            .map_err(|used| PoolError::NoMemory {
                requested: size,
                remaining: limit.saturating_sub(used),
            })?;

        let used = self.used();
        self.inner.peak.fetch_max(used, Ordering::Relaxed);

        Ok(DataLease {
            budget: Arc::clone(&self.inner),
            size,
        })
    }

    /// Returns the budget in bytes.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    /// Returns the bytes currently reserved.
    #[must_use]
    pub fn used(&self) -> usize {
        self.inner.used.load(Ordering::Acquire)
    }

    /// Returns the highest reservation level seen.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for DataBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataBudget")
            .field("limit", &self.inner.limit)
            .field("used", &self.used())
            .finish()
    }
}

/// Reservation of decoded-data bytes.
#[derive(Debug)]
pub struct DataLease {
    budget: Arc<BudgetInner>,
    size: usize,
}

impl DataLease {
    /// Returns the reserved size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for DataLease {
    fn drop(&mut self) {
        self.budget.used.fetch_sub(self.size, Ordering::AcqRel);
    }
}

impl fmt::Debug for BudgetInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BudgetInner")
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}
