// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wall-clock source for event and registration timestamps.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Source of UNIX timestamps in seconds.
///
/// The hub reads it when a payload carries no timestamp and when a device
/// registers. Tests swap in a [`Clock::manual`] source.
#[derive(Clone)]
pub struct Clock {
    now: Arc<dyn Fn() -> u32 + Send + Sync>,
}

impl Clock {
    /// System time through `chrono`.
    #[must_use]
    pub fn system() -> Self {
        Self::from_fn(|| u32::try_from(chrono::Utc::now().timestamp()).unwrap_or(0))
    }

    /// Clock backed by an arbitrary function.
    #[must_use]
    pub fn from_fn(now: impl Fn() -> u32 + Send + Sync + 'static) -> Self {
        Self { now: Arc::new(now) }
    }

    /// Clock driven by hand. The returned cell holds the current time.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::atomic::Ordering;
    /// use ha_hub::clock::Clock;
    ///
    /// let (clock, cell) = Clock::manual(1_000);
    /// assert_eq!(clock.now(), 1_000);
    /// cell.store(1_060, Ordering::Relaxed);
    /// assert_eq!(clock.now(), 1_060);
    /// ```
    #[must_use]
    pub fn manual(start: u32) -> (Self, Arc<AtomicU32>) {
        let cell = Arc::new(AtomicU32::new(start));
        let reader = Arc::clone(&cell);
        (Self::from_fn(move || reader.load(Ordering::Relaxed)), cell)
    }

    /// Returns the current UNIX time in seconds.
    #[must_use]
    pub fn now(&self) -> u32 {
        (self.now)()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clock").finish_non_exhaustive()
    }
}
