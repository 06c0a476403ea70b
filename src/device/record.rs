// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Registered device record.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use super::{
    DeviceAddr, DeviceApi, DeviceUuid, EndpointConfig, EndpointId, MAX_ENDPOINTS, Room,
    SessionDeviceId,
};
use crate::data::DataType;
use crate::error::IngestError;
use crate::event::Event;

/// Per-class ingest failure flags, latched on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct ErrorFlags(u32);

impl ErrorFlags {
    /// No event slot was available.
    pub const EV_NO_MEM: Self = Self(1 << 0);
    /// No endpoint was selected for a payload.
    pub const EV_NO_EP: Self = Self(1 << 1);
    /// The selected endpoint index was invalid.
    pub const EV_EP: Self = Self(1 << 2);
    /// A payload had the wrong size.
    pub const EV_PAYLOAD_SIZE: Self = Self(1 << 3);
    /// The data budget was exhausted.
    pub const EV_NO_DATA_MEM: Self = Self(1 << 4);
    /// Decoding failed.
    pub const EV_INGEST: Self = Self(1 << 5);

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every flag of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if no flag is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Returns the flag latched for an ingest failure.
    #[must_use]
    pub const fn for_error(err: &IngestError) -> Self {
        match err {
            IngestError::PoolExhausted => Self::EV_NO_MEM,
            IngestError::NoEndpoint => Self::EV_NO_EP,
            IngestError::InvalidEndpoint(_) | IngestError::NoCommandHandler(_) => Self::EV_EP,
            IngestError::PayloadSizeMismatch { .. } => Self::EV_PAYLOAD_SIZE,
            IngestError::NoMemory(_) => Self::EV_NO_DATA_MEM,
            IngestError::Decode(_) | IngestError::Command(_) => Self::EV_INGEST,
        }
    }
}

/// Running device statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DeviceStats {
    /// Payloads received.
    pub rx: u32,
    /// Bytes received.
    pub rx_bytes: u32,
    /// Commands transmitted.
    pub tx: u32,
    /// Bytes transmitted.
    pub tx_bytes: u32,
    /// Events dropped because of an error.
    pub err_ev: u32,
    /// Latched error classes.
    pub err_flags: ErrorFlags,
}

struct DeviceState {
    last_events: [Option<Event>; MAX_ENDPOINTS],
    stats: DeviceStats,
}

/// A registered device.
///
/// Devices are created by the registry and shared as `Arc<Device>`. They are
/// never removed. Events point back at their device weakly, so a retained
/// event does not keep its device alive.
pub struct Device {
    uuid: DeviceUuid,
    addr: DeviceAddr,
    sdevuid: SessionDeviceId,
    registered_at: u32,
    api: Arc<dyn DeviceApi>,
    endpoints: Vec<&'static EndpointConfig>,
    room: Option<Arc<Room>>,
    state: Mutex<DeviceState>,
}

impl Device {
    pub(crate) fn new(
        addr: DeviceAddr,
        sdevuid: SessionDeviceId,
        registered_at: u32,
        api: Arc<dyn DeviceApi>,
        endpoints: Vec<&'static EndpointConfig>,
        room: Option<Arc<Room>>,
    ) -> Self {
        Self {
            uuid: DeviceUuid::new(),
            addr,
            sdevuid,
            registered_at,
            api,
            endpoints,
            room,
            state: Mutex::new(DeviceState {
                last_events: Default::default(),
                stats: DeviceStats::default(),
            }),
        }
    }

    /// Returns the random device identifier.
    #[must_use]
    pub fn uuid(&self) -> DeviceUuid {
        self.uuid
    }

    /// Returns the device address.
    #[must_use]
    pub fn addr(&self) -> &DeviceAddr {
        &self.addr
    }

    /// Returns the session-unique id.
    #[must_use]
    pub fn sdevuid(&self) -> SessionDeviceId {
        self.sdevuid
    }

    /// Returns the registration UNIX timestamp in seconds.
    #[must_use]
    pub fn registered_at(&self) -> u32 {
        self.registered_at
    }

    /// Returns the room the device was placed in, if any.
    #[must_use]
    pub fn room(&self) -> Option<&Arc<Room>> {
        self.room.as_ref()
    }

    pub(crate) fn api(&self) -> &dyn DeviceApi {
        self.api.as_ref()
    }

    // ========================================================================
    // Endpoints
    // ========================================================================

    /// Returns the number of endpoints.
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Returns the configuration of endpoint `index`.
    #[must_use]
    pub fn endpoint(&self, index: usize) -> Option<&'static EndpointConfig> {
        self.endpoints.get(index).copied()
    }

    /// Returns the configuration of the endpoint with the given id.
    #[must_use]
    pub fn endpoint_by_id(&self, id: EndpointId) -> Option<&'static EndpointConfig> {
        self.endpoints.iter().copied().find(|ep| ep.id == id)
    }

    /// Returns the index of the endpoint with the given id.
    #[must_use]
    pub fn endpoint_index_by_id(&self, id: EndpointId) -> Option<usize> {
        self.endpoints.iter().position(|ep| ep.id == id)
    }

    /// Returns true if any endpoint produces values of `data_type`.
    #[must_use]
    pub fn has_data_type(&self, data_type: DataType) -> bool {
        self.endpoints.iter().any(|ep| ep.has_data_type(data_type))
    }

    /// Returns true if endpoint `index` produces data.
    #[must_use]
    pub fn supports_data(&self, index: usize) -> bool {
        self.endpoint(index)
            .is_some_and(|ep| ep.data_size > 0 && !ep.data_descr.is_empty())
    }

    /// Returns true if endpoint `index` accepts commands.
    #[must_use]
    pub fn supports_commands(&self, index: usize) -> bool {
        self.endpoint(index).is_some_and(EndpointConfig::supports_commands)
    }

    /// Returns the retained data event of endpoint `index`.
    #[must_use]
    pub fn last_event(&self, index: usize) -> Option<Event> {
        self.state.lock().last_events.get(index)?.clone()
    }

    /// Returns the first retained data event, scanning endpoints in order.
    #[must_use]
    pub fn first_last_event(&self) -> Option<Event> {
        let state = self.state.lock();
        state.last_events.iter().flatten().next().cloned()
    }

    /// Clones the retained events of the endpoints selected by `mask`.
    pub(crate) fn pin_last_events(&self, mask: u32) -> [Option<Event>; MAX_ENDPOINTS] {
        let state = self.state.lock();
        let mut pinned: [Option<Event>; MAX_ENDPOINTS] = Default::default();
        for (index, slot) in pinned.iter_mut().enumerate().take(self.endpoints.len()) {
            if mask & (1 << index) != 0 {
                slot.clone_from(&state.last_events[index]);
            }
        }
        pinned
    }

    /// Stores `event` as the retained event of endpoint `index`.
    ///
    /// Returns the previous holder so that the caller drops it outside the
    /// device lock.
    pub(crate) fn replace_last_event(&self, index: usize, event: Option<Event>) -> Option<Event> {
        let mut state = self.state.lock();
        let slot = state.last_events.get_mut(index)?;
        std::mem::replace(slot, event)
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Returns a copy of the statistics.
    #[must_use]
    pub fn stats(&self) -> DeviceStats {
        self.state.lock().stats
    }

    pub(crate) fn record_rx(&self, bytes: usize) {
        let mut state = self.state.lock();
        state.stats.rx = state.stats.rx.wrapping_add(1);
        state.stats.rx_bytes = state
            .stats
            .rx_bytes
            .wrapping_add(u32::try_from(bytes).unwrap_or(u32::MAX));
    }

    pub(crate) fn record_tx(&self, bytes: usize) {
        let mut state = self.state.lock();
        state.stats.tx = state.stats.tx.wrapping_add(1);
        state.stats.tx_bytes = state
            .stats
            .tx_bytes
            .wrapping_add(u32::try_from(bytes).unwrap_or(u32::MAX));
    }

    pub(crate) fn record_error(&self, err: &IngestError) {
        let mut state = self.state.lock();
        state.stats.err_ev = state.stats.err_ev.wrapping_add(1);
        state.stats.err_flags.insert(ErrorFlags::for_error(err));
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("sdevuid", &self.sdevuid)
            .field("addr", &self.addr)
            .field("uuid", &self.uuid)
            .field("endpoints", &self.endpoints.len())
            .finish_non_exhaustive()
    }
}
