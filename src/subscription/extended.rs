// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stateful per-device filters.
//!
//! An [`ExtendedFilter`] keeps a lookup table with one entry per key (every
//! event, or every device) and accepts or rejects events according to its
//! [`FilterMode`]. Entries are created on first sight and only freed by
//! [`ExtendedFilter::clear`].
//!
//! ```
//! use std::sync::Arc;
//! use ha_hub::subscription::{ExtendedFilter, FilterMode, LookupKind, SubscriptionConf};
//!
//! // Only the first event of each device.
//! let filter = Arc::new(ExtendedFilter::new(LookupKind::SessionDeviceId, FilterMode::Duplicate)?);
//! let mut conf = SubscriptionConf::new();
//! filter.install(&mut conf)?;
//! # Ok::<(), ha_hub::Error>(())
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{EventFilter, SubscriptionConf};
use crate::device::SessionDeviceId;
use crate::error::SubscriptionError;
use crate::event::Event;

/// What a lookup table entry is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupKind {
    /// A single entry shared by every event.
    Any,
    /// One entry per device session id.
    SessionDeviceId,
    /// One entry per device and endpoint. Not supported.
    SessionDeviceIdEndpoint,
    /// One entry per device address. Not supported.
    DeviceAddr,
    /// One entry per device address and endpoint. Not supported.
    DeviceAddrEndpoint,
    /// One entry per endpoint id. Not supported.
    EndpointId,
}

/// How events are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    /// Accept everything, only fill the table.
    None,
    /// Accept the first event of each key.
    Duplicate,
    /// Accept the first `n` events of each key.
    Count(u32),
    /// Accept one event per key every `n` seconds.
    Interval(u32),
    /// Millisecond intervals. Not supported: event timestamps have a
    /// one-second resolution.
    IntervalMs(u32),
    /// Accept one event out of `n` per key.
    Subsampling(u32),
}

/// Per-key state of a lookup table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// The key was seen.
    Seen,
    /// Events counted so far, saturating.
    Count(u32),
    /// Timestamp of the last accepted event.
    LastAccepted(u32),
    /// Position in the subsampling cycle.
    Modulo(u32),
}

/// A lookup table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupEntry {
    /// Device the entry belongs to, `None` for [`LookupKind::Any`].
    pub sdevuid: Option<SessionDeviceId>,
    /// Mode specific state.
    pub state: EntryState,
}

/// A stateful filter installed on a [`SubscriptionConf`].
pub struct ExtendedFilter {
    lookup: LookupKind,
    mode: FilterMode,
    table: Mutex<Vec<LookupEntry>>,
}

impl ExtendedFilter {
    /// Creates a filter with an empty table.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::NotSupported`] for lookup kinds other
    /// than [`LookupKind::Any`] and [`LookupKind::SessionDeviceId`] and for
    /// [`FilterMode::IntervalMs`], and [`SubscriptionError::InvalidConfig`]
    /// for a zero subsampling ratio.
    pub fn new(lookup: LookupKind, mode: FilterMode) -> Result<Self, SubscriptionError> {
        match lookup {
            LookupKind::Any | LookupKind::SessionDeviceId => {}
            LookupKind::SessionDeviceIdEndpoint
            | LookupKind::DeviceAddr
            | LookupKind::DeviceAddrEndpoint
            | LookupKind::EndpointId => {
                return Err(SubscriptionError::NotSupported("lookup kind"));
            }
        }
        match mode {
            FilterMode::IntervalMs(_) => {
                return Err(SubscriptionError::NotSupported("millisecond interval"));
            }
            FilterMode::Subsampling(0) => {
                return Err(SubscriptionError::InvalidConfig("subsampling ratio is zero"));
            }
            _ => {}
        }

        Ok(Self {
            lookup,
            mode,
            table: Mutex::new(Vec::new()),
        })
    }

    /// Returns the lookup kind.
    #[must_use]
    pub fn lookup(&self) -> LookupKind {
        self.lookup
    }

    /// Returns the filtering mode.
    #[must_use]
    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    /// Sets this filter as the custom filter of `conf`.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::FilterAlreadySet`] if `conf` already has
    /// a custom filter.
    pub fn install(self: &Arc<Self>, conf: &mut SubscriptionConf) -> Result<(), SubscriptionError> {
        if conf.has_filter() {
            return Err(SubscriptionError::FilterAlreadySet);
        }
        conf.set_filter(Arc::clone(self) as Arc<dyn EventFilter>);
        Ok(())
    }

    /// Frees every table entry.
    pub fn clear(&self) {
        let mut table = self.table.lock();
        tracing::debug!(entries = table.len(), "clearing lookup table");
        table.clear();
    }

    /// Returns a copy of the table.
    #[must_use]
    pub fn entries(&self) -> Vec<LookupEntry> {
        self.table.lock().clone()
    }

    /// Returns the number of table entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Returns true if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn key(&self, event: &Event) -> Option<SessionDeviceId> {
        match self.lookup {
            LookupKind::SessionDeviceId => Some(event.sdevuid()),
            _ => None,
        }
    }

    fn initial_state(&self, timestamp: u32) -> EntryState {
        match self.mode {
            FilterMode::Count(_) => EntryState::Count(0),
            FilterMode::Interval(_) | FilterMode::IntervalMs(_) => {
                EntryState::LastAccepted(timestamp)
            }
            FilterMode::Subsampling(_) => EntryState::Modulo(0),
            FilterMode::None | FilterMode::Duplicate => EntryState::Seen,
        }
    }
}

impl EventFilter for ExtendedFilter {
    fn accept(&self, event: &Event) -> bool {
        let key = self.key(event);
        let timestamp = event.timestamp();

        let mut table = self.table.lock();
        let (entry, created) = match table.iter().position(|e| e.sdevuid == key) {
            Some(index) => (&mut table[index], false),
            None => {
                table.push(LookupEntry {
                    sdevuid: key,
                    state: self.initial_state(timestamp),
                });
                let last = table.len() - 1;
                (&mut table[last], true)
            }
        };

        match (self.mode, &mut entry.state) {
            (FilterMode::None, _) => true,
            (FilterMode::Duplicate, _) => created,
            (FilterMode::Count(max), EntryState::Count(count)) => {
                *count = count.saturating_add(1);
                *count <= max
            }
            (FilterMode::Interval(interval), EntryState::LastAccepted(last)) => {
                if created {
                    return true;
                }
                if timestamp.wrapping_sub(*last) >= interval {
                    *last = timestamp;
                    true
                } else {
                    false
                }
            }
            (FilterMode::Subsampling(ratio), EntryState::Modulo(position)) => {
                if *position == ratio {
                    *position = 0;
                }
                let accept = *position == 0;
                *position += 1;
                accept
            }
            _ => false,
        }
    }
}

impl fmt::Debug for ExtendedFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendedFilter")
            .field("lookup", &self.lookup)
            .field("mode", &self.mode)
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventAlloc, EventKind};

    fn accepts(filter: &ExtendedFilter, alloc: &EventAlloc, timestamps: &[u32]) -> Vec<bool> {
        timestamps
            .iter()
            .map(|&ts| {
                let event = alloc.alloc(EventKind::Data).unwrap().timestamp(ts).freeze();
                filter.accept(&event)
            })
            .collect()
    }

    #[test]
    fn unsupported_configurations() {
        assert!(matches!(
            ExtendedFilter::new(LookupKind::DeviceAddr, FilterMode::None),
            Err(SubscriptionError::NotSupported(_))
        ));
        assert!(matches!(
            ExtendedFilter::new(LookupKind::Any, FilterMode::IntervalMs(10)),
            Err(SubscriptionError::NotSupported(_))
        ));
        assert!(matches!(
            ExtendedFilter::new(LookupKind::Any, FilterMode::Subsampling(0)),
            Err(SubscriptionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn duplicate_accepts_first_only() {
        let alloc = EventAlloc::new(1, 0);
        let filter = ExtendedFilter::new(LookupKind::Any, FilterMode::Duplicate).unwrap();
        assert_eq!(accepts(&filter, &alloc, &[1, 2, 3]), [true, false, false]);
        assert_eq!(filter.len(), 1);

        filter.clear();
        assert!(filter.is_empty());
        assert_eq!(accepts(&filter, &alloc, &[4]), [true]);
    }

    #[test]
    fn count_saturates() {
        let alloc = EventAlloc::new(1, 0);
        let filter = ExtendedFilter::new(LookupKind::Any, FilterMode::Count(2)).unwrap();
        assert_eq!(
            accepts(&filter, &alloc, &[1, 2, 3, 4]),
            [true, true, false, false]
        );
        assert_eq!(filter.entries()[0].state, EntryState::Count(4));
    }

    #[test]
    fn interval_in_seconds() {
        let alloc = EventAlloc::new(1, 0);
        let filter = ExtendedFilter::new(LookupKind::Any, FilterMode::Interval(10)).unwrap();
        assert_eq!(
            accepts(&filter, &alloc, &[100, 105, 110, 115, 119, 120]),
            [true, false, true, false, false, true]
        );
    }

    #[test]
    fn subsampling_keeps_one_of_n() {
        let alloc = EventAlloc::new(1, 0);
        let filter = ExtendedFilter::new(LookupKind::Any, FilterMode::Subsampling(3)).unwrap();
        assert_eq!(
            accepts(&filter, &alloc, &[1, 2, 3, 4, 5, 6, 7]),
            [true, false, false, true, false, false, true]
        );
    }

    #[test]
    fn none_mode_accepts_and_records() {
        let alloc = EventAlloc::new(1, 0);
        let filter = ExtendedFilter::new(LookupKind::SessionDeviceId, FilterMode::None).unwrap();
        assert_eq!(accepts(&filter, &alloc, &[1, 2]), [true, true]);
        assert_eq!(filter.entries().len(), 1);
    }

    #[test]
    fn install_refuses_second_filter() {
        let filter = Arc::new(ExtendedFilter::new(LookupKind::Any, FilterMode::None).unwrap());
        let mut conf = SubscriptionConf::new();
        filter.install(&mut conf).unwrap();
        assert!(matches!(
            filter.install(&mut conf),
            Err(SubscriptionError::FilterAlreadySet)
        ));
    }
}
