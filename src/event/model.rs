// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event handles.

use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::{AuxData, Dataset};
use crate::device::{Device, DeviceAddr, SessionDeviceId};
use crate::error::IngestError;
use crate::pool::{DataLease, PoolSlot};

/// Kind of fact an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Decoded sensor or state data.
    Data,
    /// A command sent to the device.
    Command,
    /// A failed command.
    Error,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data => f.write_str("data"),
            Self::Command => f.write_str("command"),
            Self::Error => f.write_str("error"),
        }
    }
}

struct EventInner {
    kind: EventKind,
    timestamp: u32,
    device: Weak<Device>,
    sdevuid: SessionDeviceId,
    addr: DeviceAddr,
    endpoint: usize,
    data: Option<Box<dyn Dataset>>,
    aux: Vec<AuxData>,
    error: Option<IngestError>,
    // Released after the data above, in declaration order.
    _lease: Option<DataLease>,
    slot: PoolSlot,
}

/// Shared handle to an immutable event.
///
/// Cloning takes a reference; dropping releases it. When the last handle
/// goes away the decoded data is freed, its bytes return to the data budget
/// and the event slot returns to the event pool, all synchronously.
///
/// Events are built with an [`EventBuilder`] and become immutable on
/// [`EventBuilder::freeze`].
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    /// Returns the event kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.inner.kind
    }

    /// Returns the UNIX timestamp in seconds.
    #[must_use]
    pub fn timestamp(&self) -> u32 {
        self.inner.timestamp
    }

    /// Returns the timestamp as a date, `None` when unset.
    #[must_use]
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        match self.inner.timestamp {
            0 => None,
            ts => DateTime::from_timestamp(i64::from(ts), 0),
        }
    }

    /// Returns the device, if it is still alive.
    #[must_use]
    pub fn device(&self) -> Option<Arc<Device>> {
        self.inner.device.upgrade()
    }

    /// Returns the session id of the device.
    #[must_use]
    pub fn sdevuid(&self) -> SessionDeviceId {
        self.inner.sdevuid
    }

    /// Returns the address of the device.
    #[must_use]
    pub fn addr(&self) -> &DeviceAddr {
        &self.inner.addr
    }

    /// Returns the endpoint index the event belongs to.
    #[must_use]
    pub fn endpoint_index(&self) -> usize {
        self.inner.endpoint
    }

    /// Returns the decoded data as its concrete type.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # fn show(event: &ha_hub::event::Event) {
    /// use ha_hub::catalog::XiaomiDataset;
    ///
    /// if let Some(xiaomi) = event.data::<XiaomiDataset>() {
    ///     println!("{} °C", xiaomi.temperature.celsius());
    /// }
    /// # }
    /// ```
    #[must_use]
    pub fn data<T: Dataset>(&self) -> Option<&T> {
        self.dataset()?.downcast_ref()
    }

    /// Returns the decoded data for generic introspection.
    #[must_use]
    pub fn dataset(&self) -> Option<&dyn Dataset> {
        self.inner.data.as_deref()
    }

    /// Returns the auxiliary data items.
    #[must_use]
    pub fn aux(&self) -> &[AuxData] {
        &self.inner.aux
    }

    /// Returns the failure carried by an error event.
    #[must_use]
    pub fn error(&self) -> Option<&IngestError> {
        self.inner.error.as_ref()
    }

    /// Returns the number of live handles to this event.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Returns true if both handles refer to the same event.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Returns the pool slot index, for diagnostics.
    #[must_use]
    pub fn slot_index(&self) -> usize {
        self.inner.slot.index()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("kind", &self.inner.kind)
            .field("timestamp", &self.inner.timestamp)
            .field("sdevuid", &self.inner.sdevuid)
            .field("endpoint", &self.inner.endpoint)
            .field("refs", &self.ref_count())
            .finish_non_exhaustive()
    }
}

/// Mutable event under construction.
///
/// Obtained from [`EventAlloc::alloc`](super::EventAlloc::alloc), which has
/// already taken the pool slot. Dropping a builder without freezing it
/// releases the slot.
pub struct EventBuilder {
    kind: EventKind,
    timestamp: u32,
    device: Weak<Device>,
    sdevuid: SessionDeviceId,
    addr: DeviceAddr,
    endpoint: usize,
    data: Option<Box<dyn Dataset>>,
    aux: Vec<AuxData>,
    error: Option<IngestError>,
    lease: Option<DataLease>,
    slot: PoolSlot,
}

impl EventBuilder {
    pub(crate) fn new(slot: PoolSlot, kind: EventKind) -> Self {
        Self {
            kind,
            timestamp: 0,
            device: Weak::new(),
            sdevuid: SessionDeviceId::new(0),
            addr: DeviceAddr::default(),
            endpoint: 0,
            data: None,
            aux: Vec::new(),
            error: None,
            lease: None,
            slot,
        }
    }

    /// Attaches the event to endpoint `endpoint` of `device`.
    #[must_use]
    pub fn device(mut self, device: &Arc<Device>, endpoint: usize) -> Self {
        self.device = Arc::downgrade(device);
        self.sdevuid = device.sdevuid();
        self.addr = *device.addr();
        self.endpoint = endpoint;
        self
    }

    /// Sets the timestamp.
    #[must_use]
    pub fn timestamp(mut self, timestamp: u32) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sets the decoded data together with the budget lease that pays for it.
    #[must_use]
    pub fn data(mut self, data: Box<dyn Dataset>, lease: DataLease) -> Self {
        self.data = Some(data);
        self.lease = Some(lease);
        self
    }

    /// Records the failure carried by an error event.
    #[must_use]
    pub fn error(mut self, error: IngestError) -> Self {
        self.error = Some(error);
        self
    }

    /// Appends an auxiliary data item.
    pub fn push_aux(&mut self, item: AuxData) -> &mut Self {
        self.aux.push(item);
        self
    }

    /// Makes the event immutable and returns the creator's handle.
    #[must_use]
    pub fn freeze(self) -> Event {
        Event {
            inner: Arc::new(EventInner {
                kind: self.kind,
                timestamp: self.timestamp,
                device: self.device,
                sdevuid: self.sdevuid,
                addr: self.addr,
                endpoint: self.endpoint,
                data: self.data,
                aux: self.aux,
                error: self.error,
                _lease: self.lease,
                slot: self.slot,
            }),
        }
    }
}

impl fmt::Debug for EventBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBuilder")
            .field("kind", &self.kind)
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}
