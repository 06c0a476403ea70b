// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event allocation and payload ingestion.

use std::sync::Arc;

use super::{EventBuilder, EventKind};
use crate::device::{Device, Payload};
use crate::error::{IngestError, PoolError};
use crate::event::Event;
use crate::pool::{DataBudget, DataLease, Pool};

/// Allocator for events and their decoded data.
#[derive(Debug, Clone)]
pub struct EventAlloc {
    pool: Pool,
    budget: DataBudget,
}

impl EventAlloc {
    /// Creates an allocator for `capacity` events sharing `data_limit` bytes.
    #[must_use]
    pub fn new(capacity: usize, data_limit: usize) -> Self {
        Self {
            pool: Pool::new("event", capacity),
            budget: DataBudget::new(data_limit),
        }
    }

    /// Takes an event slot and starts building an event.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Exhausted`] when no slot is free. Never blocks.
    pub fn alloc(&self, kind: EventKind) -> Result<EventBuilder, PoolError> {
        let slot = self.pool.try_acquire()?;
        Ok(EventBuilder::new(slot, kind))
    }

    /// Reserves decoded-data bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NoMemory`] when the budget is exhausted.
    pub fn reserve(&self, size: usize) -> Result<DataLease, PoolError> {
        self.budget.try_reserve(size)
    }

    /// Returns the event pool.
    #[must_use]
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Returns the decoded-data budget.
    #[must_use]
    pub fn budget(&self) -> &DataBudget {
        &self.budget
    }
}

/// Result of a successful ingestion.
#[derive(Debug)]
pub(crate) struct Ingested {
    pub(crate) event: Event,
    pub(crate) endpoint: usize,
}

/// Turns a raw payload into a data event of `device`.
///
/// The event is not retained or dispatched here. On error every resource
/// taken so far is released before returning.
pub(crate) fn ingest(
    alloc: &EventAlloc,
    device: &Arc<Device>,
    payload: &Payload<'_>,
    now: u32,
) -> Result<Ingested, IngestError> {
    let builder = alloc
        .alloc(EventKind::Data)
        .map_err(|_| IngestError::PoolExhausted)?;

    let index = device
        .api()
        .select_endpoint(payload)
        .ok_or(IngestError::NoEndpoint)?;
    let endpoint = device
        .endpoint(index)
        .ok_or(IngestError::InvalidEndpoint(index))?;

    if endpoint.expected_payload_size != 0
        && payload.bytes.len() != endpoint.expected_payload_size
    {
        return Err(IngestError::PayloadSizeMismatch {
            expected: endpoint.expected_payload_size,
            actual: payload.bytes.len(),
        });
    }

    let lease = alloc
        .reserve(endpoint.data_size)
        .map_err(|_| IngestError::NoMemory(endpoint.data_size))?;

    let timestamp = if payload.timestamp == 0 {
        now
    } else {
        payload.timestamp
    };
    let decoded = (endpoint.ingest)(payload)?;

    let event = builder
        .device(device, index)
        .timestamp(decoded.timestamp.unwrap_or(timestamp))
        .data(decoded.data, lease)
        .freeze();

    Ok(Ingested {
        event,
        endpoint: index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{AuxData, Assignment, DataValue, Rssi};

    #[test]
    fn last_handle_frees_slot_and_budget() {
        let alloc = EventAlloc::new(2, 64);
        let lease = alloc.reserve(24).unwrap();
        let event = alloc
            .alloc(EventKind::Data)
            .unwrap()
            .timestamp(10)
            .data(Box::new(crate::catalog::DieTemperature::default()), lease)
            .freeze();

        let copy = event.clone();
        assert_eq!(event.ref_count(), 2);
        assert_eq!(alloc.pool().in_use(), 1);
        assert_eq!(alloc.budget().used(), 24);

        drop(event);
        assert_eq!(copy.ref_count(), 1);
        assert_eq!(alloc.pool().in_use(), 1);

        drop(copy);
        assert_eq!(alloc.pool().in_use(), 0);
        assert_eq!(alloc.budget().used(), 0);
    }

    #[test]
    fn alloc_fails_closed() {
        let alloc = EventAlloc::new(1, 0);
        let held = alloc.alloc(EventKind::Data).unwrap();
        assert!(matches!(
            alloc.alloc(EventKind::Command),
            Err(PoolError::Exhausted { pool: "event", .. })
        ));
        drop(held);
        assert!(alloc.alloc(EventKind::Command).is_ok());
    }

    #[test]
    fn aux_items_are_frozen_with_the_event() {
        let alloc = EventAlloc::new(1, 0);
        let mut builder = alloc.alloc(EventKind::Data).unwrap();
        builder.push_aux(AuxData {
            assignment: Assignment::Unassigned,
            value: DataValue::Rssi(Rssi { value: -70 }),
        });
        let event = builder.freeze();
        assert_eq!(event.aux().len(), 1);
        assert!(event.dataset().is_none());
        assert!(event.datetime().is_none());
    }

    #[test]
    fn timestamp_as_date() {
        let alloc = EventAlloc::new(1, 0);
        let event = alloc.alloc(EventKind::Data).unwrap().timestamp(86_400).freeze();
        assert_eq!(event.datetime().unwrap().to_rfc3339(), "1970-01-02T00:00:00+00:00");
    }

    #[test]
    fn pool_stress_returns_to_zero() {
        let alloc = EventAlloc::new(16, 16 * 8);
        for _ in 0..10 {
            let events: Vec<Event> = (0..16)
                .map(|n| {
                    let lease = alloc.reserve(8).unwrap();
                    alloc
                        .alloc(EventKind::Data)
                        .unwrap()
                        .timestamp(n)
                        .data(Box::new(crate::catalog::DieTemperature::default()), lease)
                        .freeze()
                })
                .collect();
            assert!(alloc.alloc(EventKind::Data).is_err());
            let shared: Vec<Event> = events.iter().take(8).cloned().collect();
            drop(events);
            assert_eq!(alloc.pool().in_use(), 8);
            drop(shared);
            assert_eq!(alloc.pool().in_use(), 0);
            assert_eq!(alloc.budget().used(), 0);
        }
    }
}
