// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Global hub statistics.
//!
//! Capacity and validation failures in the registry and the ingest path are
//! counted here instead of being propagated as panics. Counters only ever
//! increase; [`HubStats::snapshot`] copies them together with the current
//! pool occupancy into a serializable [`StatsSnapshot`].

use std::sync::atomic::{AtomicU32, Ordering};

use serde::Serialize;

use crate::error::{IngestError, RegistryError};
use crate::pool::{DataBudget, Pool};

macro_rules! counters {
    ($( $(#[$doc:meta])* $name:ident ),* $(,)?) => {
        /// Atomic counters shared by the registry, the event path and the
        /// dispatcher.
        #[derive(Debug, Default)]
        pub struct HubStats {
            $( $(#[$doc])* $name: AtomicU32, )*
        }

        /// Counter values at one point in time.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
        pub struct Counters {
            $( $(#[$doc])* pub $name: u32, )*
        }

        impl HubStats {
            /// Copies the counters.
            #[must_use]
            pub fn counters(&self) -> Counters {
                Counters {
                    $( $name: self.$name.load(Ordering::Relaxed), )*
                }
            }
        }
    };
}

counters! {
    /// Events successfully dispatched.
    ev,
    /// Registrations that failed, for any reason.
    dev_dropped,
    /// Registrations refused because the device list is full.
    dev_no_mem,
    /// Registrations refused for lack of a capability table.
    dev_no_api,
    /// Registrations whose endpoint initialization failed.
    dev_ep_init,
    /// Registrations declaring no endpoint.
    dev_no_ep,
    /// Registrations declaring too many endpoints.
    dev_toomuch_ep,
    /// Events dropped, for any reason.
    ev_dropped,
    /// Data events dropped.
    ev_data_dropped,
    /// Command events dropped.
    ev_cmd_dropped,
    /// Events dropped because the event pool was exhausted.
    ev_no_mem,
    /// Events dropped because no endpoint took the payload.
    ev_no_ep,
    /// Events dropped because of an invalid endpoint index.
    ev_ep,
    /// Events dropped because of a payload size mismatch.
    ev_payload_size,
    /// Events dropped because the data budget was exhausted.
    ev_no_data_mem,
    /// Events dropped because decoding failed.
    ev_ingest,
    /// Events no subscriber and no endpoint kept.
    ev_never_ref,
    /// Subscriptions refused because the pool was exhausted.
    sub_no_mem,
}

fn bump(counter: &AtomicU32) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl HubStats {
    /// Creates zeroed statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_registration_failure(&self, err: &RegistryError) {
        bump(&self.dev_dropped);
        match err {
            RegistryError::OutOfCapacity(_) => bump(&self.dev_no_mem),
            RegistryError::UnsupportedType(_) => bump(&self.dev_no_api),
            RegistryError::EndpointInit(_) => bump(&self.dev_ep_init),
            RegistryError::NoEndpoints => bump(&self.dev_no_ep),
            RegistryError::TooManyEndpoints { .. } => bump(&self.dev_toomuch_ep),
            RegistryError::NoDevices | RegistryError::DeviceNotFound => {}
        }
    }

    pub(crate) fn record_ingest_failure(&self, err: &IngestError, command: bool) {
        bump(&self.ev_dropped);
        if command {
            bump(&self.ev_cmd_dropped);
        } else {
            bump(&self.ev_data_dropped);
        }
        match err {
            IngestError::PoolExhausted => bump(&self.ev_no_mem),
            IngestError::NoEndpoint => bump(&self.ev_no_ep),
            IngestError::InvalidEndpoint(_) | IngestError::NoCommandHandler(_) => {
                bump(&self.ev_ep);
            }
            IngestError::PayloadSizeMismatch { .. } => bump(&self.ev_payload_size),
            IngestError::NoMemory(_) => bump(&self.ev_no_data_mem),
            IngestError::Decode(_) | IngestError::Command(_) => bump(&self.ev_ingest),
        }
    }

    pub(crate) fn record_event(&self) {
        bump(&self.ev);
    }

    pub(crate) fn record_never_referenced(&self) {
        bump(&self.ev_never_ref);
    }

    pub(crate) fn record_subscription_refused(&self) {
        bump(&self.sub_no_mem);
    }

    /// Copies the counters together with the occupancy of the given pools.
    #[must_use]
    pub fn snapshot(&self, memory: &MemoryPools<'_>) -> StatsSnapshot {
        StatsSnapshot {
            counters: self.counters(),
            memory: MemoryUsage {
                ev_count: memory.events.in_use(),
                ev_remaining: memory.events.available(),
                device_count: memory.devices,
                device_remaining: memory.device_capacity.saturating_sub(memory.devices),
                sub_count: memory.subscriptions.in_use(),
                sub_remaining: memory.subscriptions.available(),
                heap_alloc: memory.data.used(),
                heap_total: memory.data.limit(),
                heap_peak: memory.data.peak(),
            },
        }
    }
}

/// Borrowed view of the pools measured by a snapshot.
#[derive(Debug)]
pub struct MemoryPools<'a> {
    /// Event pool.
    pub events: &'a Pool,
    /// Subscription pool.
    pub subscriptions: &'a Pool,
    /// Decoded-data budget.
    pub data: &'a DataBudget,
    /// Registered devices.
    pub devices: usize,
    /// Device list capacity.
    pub device_capacity: usize,
}

/// Pool occupancy at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MemoryUsage {
    /// Live events.
    pub ev_count: usize,
    /// Free event slots.
    pub ev_remaining: usize,
    /// Registered devices.
    pub device_count: usize,
    /// Free device entries.
    pub device_remaining: usize,
    /// Live subscriptions.
    pub sub_count: usize,
    /// Free subscription slots.
    pub sub_remaining: usize,
    /// Decoded-data bytes in use.
    pub heap_alloc: usize,
    /// Decoded-data budget.
    pub heap_total: usize,
    /// Highest decoded-data usage seen.
    pub heap_peak: usize,
}

/// Serializable copy of the hub statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Event and registration counters.
    #[serde(flatten)]
    pub counters: Counters,
    /// Pool occupancy.
    pub memory: MemoryUsage,
}
