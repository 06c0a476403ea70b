// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded device registry.

use std::collections::HashMap;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{
    Device, DeviceAddr, DeviceApi, DeviceType, EndpointConfig, EndpointId, MAX_ENDPOINTS, Medium,
    RoomId, RoomTable, SessionDeviceId,
};
use crate::clock::Clock;
use crate::data::{Assignment, DataDescr, DataType};
use crate::error::RegistryError;
use crate::event::Event;
use crate::stats::HubStats;

/// Device selection for [`Registry::iterate`].
///
/// Every criterion is optional; an empty filter selects every device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceFilter {
    medium: Option<Medium>,
    device_type: Option<DeviceType>,
    data: Option<Option<EndpointId>>,
    data_since: Option<u32>,
    room: Option<RoomId>,
    from_index: Option<usize>,
    to_index: Option<usize>,
    max_count: Option<usize>,
}

impl DeviceFilter {
    /// Selects every device.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps devices on the given medium.
    #[must_use]
    pub fn with_medium(mut self, medium: Medium) -> Self {
        self.medium = Some(medium);
        self
    }

    /// Keeps devices of the given type.
    #[must_use]
    pub fn with_device_type(mut self, device_type: DeviceType) -> Self {
        self.device_type = Some(device_type);
        self
    }

    /// Keeps devices holding a retained event, on the given endpoint or on
    /// any endpoint when `endpoint` is `None`.
    #[must_use]
    pub fn with_data(mut self, endpoint: Option<EndpointId>) -> Self {
        self.data = Some(endpoint);
        self
    }

    /// Drops devices whose retained event is older than `timestamp`.
    ///
    /// Only applies together with [`with_data`](Self::with_data).
    #[must_use]
    pub fn with_data_since(mut self, timestamp: u32) -> Self {
        self.data_since = Some(timestamp);
        self
    }

    /// Drops devices placed in another room. Devices without a room pass.
    #[must_use]
    pub fn with_room(mut self, room: RoomId) -> Self {
        self.room = Some(room);
        self
    }

    /// Starts at registration index `index` (included).
    #[must_use]
    pub fn with_from_index(mut self, index: usize) -> Self {
        self.from_index = Some(index);
        self
    }

    /// Stops at registration index `index` (excluded).
    #[must_use]
    pub fn with_to_index(mut self, index: usize) -> Self {
        self.to_index = Some(index);
        self
    }

    /// Stops after `count` matches.
    #[must_use]
    pub fn with_max_count(mut self, count: usize) -> Self {
        self.max_count = Some(count);
        self
    }

    fn matches(&self, device: &Device) -> bool {
        if self.medium.is_some_and(|m| device.addr().medium() != m) {
            return false;
        }
        if self
            .device_type
            .is_some_and(|t| device.addr().device_type != t)
        {
            return false;
        }

        if let Some(endpoint) = self.data {
            let event = match endpoint {
                None => device.first_last_event(),
                Some(id) => device
                    .endpoint_index_by_id(id)
                    .and_then(|index| device.last_event(index)),
            };
            let Some(event) = event else {
                return false;
            };
            if self.data_since.is_some_and(|since| event.timestamp() < since) {
                return false;
            }
        }

        match (self.room, device.room()) {
            (Some(wanted), Some(room)) => room.id() == wanted,
            _ => true,
        }
    }
}

/// Options for [`Registry::iterate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterOptions {
    /// Bit `i` pins the retained event of endpoint `i` for the callback.
    pub pin_mask: u32,
}

impl Default for IterOptions {
    /// Pins endpoint 0 only.
    fn default() -> Self {
        Self { pin_mask: 1 }
    }
}

/// Retained events pinned for one iteration callback, by endpoint index.
pub type PinnedEvents = [Option<Event>; MAX_ENDPOINTS];

struct DeviceList {
    devices: Vec<Arc<Device>>,
    next_sdevuid: SessionDeviceId,
}

/// The bounded list of known devices.
///
/// Devices are appended on first sight of their address and never removed.
/// Session ids are handed out in registration order, starting at 1, and
/// only on successful registration.
pub struct Registry {
    list: RwLock<DeviceList>,
    capacity: usize,
    apis: HashMap<DeviceType, Arc<dyn DeviceApi>>,
    rooms: RoomTable,
    stats: Arc<HubStats>,
    clock: Clock,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(
        capacity: usize,
        apis: HashMap<DeviceType, Arc<dyn DeviceApi>>,
        rooms: RoomTable,
        stats: Arc<HubStats>,
        clock: Clock,
    ) -> Self {
        Self {
            list: RwLock::new(DeviceList {
                devices: Vec::with_capacity(capacity),
                next_sdevuid: SessionDeviceId::FIRST,
            }),
            capacity,
            apis,
            rooms,
            stats,
            clock,
        }
    }

    /// Returns the device list capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of registered devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.list.read().devices.len()
    }

    /// Returns true if no device is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the room table.
    #[must_use]
    pub fn rooms(&self) -> &RoomTable {
        &self.rooms
    }

    /// Looks a device up without registering it.
    ///
    /// Addresses without a comparator (no medium) resolve to the first
    /// device of the same type.
    #[must_use]
    pub fn get(&self, addr: &DeviceAddr) -> Option<Arc<Device>> {
        find(&self.list.read().devices, addr).cloned()
    }

    /// Returns the device registered at position `index`.
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<Arc<Device>> {
        self.list.read().devices.get(index).cloned()
    }

    /// Returns the device with the given session id.
    #[must_use]
    pub fn get_by_sdevuid(&self, sdevuid: SessionDeviceId) -> Option<Arc<Device>> {
        self.list
            .read()
            .devices
            .iter()
            .find(|d| d.sdevuid() == sdevuid)
            .cloned()
    }

    /// Returns the device at `addr`, registering it if unseen.
    ///
    /// Failures are counted in the hub statistics and reported as `None`.
    pub fn find_or_register(&self, addr: &DeviceAddr) -> Option<Arc<Device>> {
        self.register(addr).ok()
    }

    /// Same as [`find_or_register`](Self::find_or_register) with the failure
    /// reason.
    ///
    /// # Errors
    ///
    /// Returns the [`RegistryError`] that prevented registration. The
    /// failure has already been counted.
    pub fn register(&self, addr: &DeviceAddr) -> Result<Arc<Device>, RegistryError> {
        if let Some(device) = self.get(addr) {
            return Ok(device);
        }

        let mut list = self.list.write();
        // Another producer may have registered it between the two locks.
        if let Some(device) = find(&list.devices, addr) {
            return Ok(Arc::clone(device));
        }

        match self.create(&list, addr) {
            Ok(device) => {
                let device = Arc::new(device);
                list.next_sdevuid = list.next_sdevuid.next();
                list.devices.push(Arc::clone(&device));
                tracing::info!(
                    sdevuid = %device.sdevuid(),
                    addr = %addr,
                    device_type = %addr.device_type,
                    "Device registered"
                );
                Ok(device)
            }
            Err(e) => {
                drop(list);
                self.stats.record_registration_failure(&e);
                tracing::warn!(addr = %addr, error = %e, "Device registration failed");
                Err(e)
            }
        }
    }

    fn create(&self, list: &DeviceList, addr: &DeviceAddr) -> Result<Device, RegistryError> {
        if list.devices.len() >= self.capacity {
            return Err(RegistryError::OutOfCapacity(self.capacity));
        }

        let api = self
            .apis
            .get(&addr.device_type)
            .cloned()
            .ok_or(RegistryError::UnsupportedType(addr.device_type))?;

        let endpoints = api
            .init_endpoints(addr)
            .map_err(RegistryError::EndpointInit)?;
        if endpoints.is_empty() {
            return Err(RegistryError::NoEndpoints);
        }
        if endpoints.len() > MAX_ENDPOINTS {
            return Err(RegistryError::TooManyEndpoints {
                declared: endpoints.len(),
                max: MAX_ENDPOINTS,
            });
        }

        let room = self.rooms.assign(addr);

        Ok(Device::new(
            *addr,
            list.next_sdevuid,
            self.clock.now(),
            api,
            endpoints,
            room,
        ))
    }

    /// Walks the devices selected by `filter`.
    ///
    /// For each match, the retained events named by `options` are pinned and
    /// handed to `callback` with no registry lock held, so the callback may
    /// call back into the hub. The walk stops when the callback breaks or
    /// when the filter's maximum count is reached.
    ///
    /// Returns the number of devices passed to `callback`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NoDevices`] when the index range is empty.
    pub fn iterate<F>(
        &self,
        filter: &DeviceFilter,
        options: IterOptions,
        mut callback: F,
    ) -> Result<usize, RegistryError>
    where
        F: FnMut(&Arc<Device>, &PinnedEvents) -> ControlFlow<()>,
    {
        let mut index = filter.from_index.unwrap_or(0);
        let max_count = filter.max_count.unwrap_or(usize::MAX);
        let mut count = 0;

        let end = |len: usize| filter.to_index.map_or(len, |to| to.min(len));

        if index >= end(self.len()) {
            return Err(RegistryError::NoDevices);
        }

        while count < max_count {
            let (device, pinned) = {
                let list = self.list.read();
                if index >= end(list.devices.len()) {
                    break;
                }
                let device = Arc::clone(&list.devices[index]);
                index += 1;
                if !filter.matches(&device) {
                    continue;
                }
                let pinned = device.pin_last_events(options.pin_mask);
                (device, pinned)
            };

            let flow = callback(&device, &pinned);
            drop(pinned);

            count += 1;
            if flow.is_break() {
                break;
            }
        }

        Ok(count)
    }

    /// Counts the data fields of `data_type` across all devices, optionally
    /// restricted to an assignment.
    #[must_use]
    pub fn count_data_inputs(&self, data_type: DataType, assignment: Option<Assignment>) -> usize {
        self.count_descr(data_type, assignment, |ep| ep.data_descr)
    }

    /// Counts the command fields of `data_type` across all devices, optionally
    /// restricted to an assignment.
    #[must_use]
    pub fn count_control_outputs(
        &self,
        data_type: DataType,
        assignment: Option<Assignment>,
    ) -> usize {
        self.count_descr(data_type, assignment, |ep| ep.cmd_descr)
    }

    fn count_descr(
        &self,
        data_type: DataType,
        assignment: Option<Assignment>,
        table: impl Fn(&EndpointConfig) -> &'static [DataDescr],
    ) -> usize {
        let list = self.list.read();
        list.devices
            .iter()
            .flat_map(|d| (0..d.endpoint_count()).filter_map(|i| d.endpoint(i)))
            .flat_map(table)
            .filter(|descr| {
                descr.data_type == data_type && assignment.is_none_or(|a| descr.assignment == a)
            })
            .count()
    }
}

fn find<'a>(devices: &'a [Arc<Device>], addr: &DeviceAddr) -> Option<&'a Arc<Device>> {
    if addr.is_valid() {
        devices.iter().find(|d| d.addr().same_device(addr))
    } else {
        devices
            .iter()
            .find(|d| d.addr().device_type == addr.device_type)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("devices", &self.len())
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::device::{BleAddr, BusDeviceId, Payload, RoomAssoc, RoomConfig};

    fn registry(capacity: usize) -> Registry {
        registry_with(capacity, RoomTable::default())
    }

    fn registry_with(capacity: usize, rooms: RoomTable) -> Registry {
        Registry::new(
            capacity,
            catalog::builtin_apis(),
            rooms,
            Arc::new(HubStats::new()),
            Clock::manual(1_700_000_000).0,
        )
    }

    fn mijia(last: u8) -> DeviceAddr {
        DeviceAddr::ble(DeviceType::XiaomiMijia, BleAddr::new([0xA4, 0xC1, 0x38, 0, 0, last]))
    }

    #[test]
    fn same_address_registers_once() {
        let reg = registry(4);
        let a = reg.find_or_register(&mijia(1)).unwrap();
        let b = reg.find_or_register(&mijia(1)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.len(), 1);
        assert_eq!(a.sdevuid(), SessionDeviceId::FIRST);
        assert_eq!(a.registered_at(), 1_700_000_000);
    }

    #[test]
    fn session_ids_are_sequential() {
        let reg = registry(4);
        let ids: Vec<u32> = (1..=3)
            .map(|n| reg.find_or_register(&mijia(n)).unwrap().sdevuid().get())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn failed_registration_does_not_consume_session_id() {
        let reg = registry(4);
        assert!(reg.find_or_register(&DeviceAddr::local(DeviceType::None)).is_none());
        let dev = reg.find_or_register(&mijia(1)).unwrap();
        assert_eq!(dev.sdevuid().get(), 1);
        assert_eq!(reg.stats.counters().dev_no_api, 1);
    }

    #[test]
    fn full_list_refuses_new_devices() {
        let reg = registry(1);
        reg.find_or_register(&mijia(1)).unwrap();
        assert_eq!(
            reg.register(&mijia(2)).unwrap_err(),
            RegistryError::OutOfCapacity(1)
        );
        // Known devices are still found.
        assert!(reg.find_or_register(&mijia(1)).is_some());
        let c = reg.stats.counters();
        assert_eq!((c.dev_dropped, c.dev_no_mem), (1, 1));
    }

    struct ThreeEndpoints;

    fn refuse(_: &Payload<'_>) -> Result<crate::device::Decoded, crate::error::IngestError> {
        Err(crate::error::IngestError::Decode("dummy".into()))
    }

    static DUMMY: EndpointConfig = EndpointConfig {
        id: EndpointId::None,
        expected_payload_size: 0,
        data_size: 0,
        ingest: refuse,
        command: None,
        data_descr: &[],
        cmd_descr: &[],
        retain_last_event: false,
    };

    impl DeviceApi for ThreeEndpoints {
        fn init_endpoints(
            &self,
            _addr: &DeviceAddr,
        ) -> Result<Vec<&'static EndpointConfig>, String> {
            Ok(vec![&DUMMY, &DUMMY, &DUMMY])
        }
    }

    #[test]
    fn too_many_endpoints_is_refused() {
        let mut apis = catalog::builtin_apis();
        apis.insert(DeviceType::XiaomiMijia, Arc::new(ThreeEndpoints));
        let reg = Registry::new(
            4,
            apis,
            RoomTable::default(),
            Arc::new(HubStats::new()),
            Clock::manual(0).0,
        );
        assert_eq!(
            reg.register(&mijia(1)).unwrap_err(),
            RegistryError::TooManyEndpoints {
                declared: 3,
                max: MAX_ENDPOINTS
            }
        );
        assert_eq!(reg.stats.counters().dev_toomuch_ep, 1);
    }

    #[test]
    fn local_address_matches_first_of_type() {
        let reg = registry(4);
        let die = reg
            .find_or_register(&DeviceAddr::local(DeviceType::NucleoF429zi))
            .unwrap();
        let again = reg.get(&DeviceAddr::local(DeviceType::NucleoF429zi)).unwrap();
        assert!(Arc::ptr_eq(&die, &again));
    }

    #[test]
    fn iterate_filters_by_medium_and_type() {
        let reg = registry(8);
        reg.find_or_register(&mijia(1)).unwrap();
        reg.find_or_register(&DeviceAddr::bus(BusDeviceId::new(1, 0).unwrap()))
            .unwrap();
        reg.find_or_register(&mijia(2)).unwrap();

        let mut seen = Vec::new();
        let count = reg
            .iterate(
                &DeviceFilter::new().with_medium(Medium::Ble),
                IterOptions::default(),
                |dev, _| {
                    seen.push(dev.sdevuid().get());
                    ControlFlow::Continue(())
                },
            )
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(seen, vec![1, 3]);

        let count = reg
            .iterate(
                &DeviceFilter::new().with_device_type(DeviceType::Caniot),
                IterOptions::default(),
                |_, _| ControlFlow::Continue(()),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn iterate_index_range_and_stop() {
        let reg = registry(8);
        for n in 1..=5 {
            reg.find_or_register(&mijia(n)).unwrap();
        }

        let mut seen = Vec::new();
        let count = reg
            .iterate(
                &DeviceFilter::new().with_from_index(1).with_to_index(4),
                IterOptions::default(),
                |dev, _| {
                    seen.push(dev.sdevuid().get());
                    ControlFlow::Continue(())
                },
            )
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(seen, vec![2, 3, 4]);

        let count = reg
            .iterate(&DeviceFilter::new(), IterOptions::default(), |_, _| {
                ControlFlow::Break(())
            })
            .unwrap();
        assert_eq!(count, 1);

        let count = reg
            .iterate(
                &DeviceFilter::new().with_max_count(2),
                IterOptions::default(),
                |_, _| ControlFlow::Continue(()),
            )
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn zero_max_count_visits_nothing() {
        let reg = registry(4);
        reg.find_or_register(&mijia(1)).unwrap();

        let mut calls = 0;
        let count = reg
            .iterate(
                &DeviceFilter::new().with_max_count(0),
                IterOptions::default(),
                |_, _| {
                    calls += 1;
                    ControlFlow::Continue(())
                },
            )
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(calls, 0);
    }

    #[test]
    fn iterate_empty_range_is_an_error() {
        let reg = registry(4);
        assert_eq!(
            reg.iterate(&DeviceFilter::new(), IterOptions::default(), |_, _| {
                ControlFlow::Continue(())
            }),
            Err(RegistryError::NoDevices)
        );

        reg.find_or_register(&mijia(1)).unwrap();
        assert_eq!(
            reg.iterate(
                &DeviceFilter::new().with_from_index(1),
                IterOptions::default(),
                |_, _| ControlFlow::Continue(())
            ),
            Err(RegistryError::NoDevices)
        );
    }

    #[test]
    fn callback_may_reenter_registry() {
        let reg = registry(4);
        reg.find_or_register(&mijia(1)).unwrap();
        let count = reg
            .iterate(&DeviceFilter::new(), IterOptions::default(), |_, _| {
                // Write lock inside the callback: would deadlock if the walk
                // held the list lock.
                reg.find_or_register(&mijia(9)).unwrap();
                ControlFlow::Break(())
            })
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn iterate_by_room() {
        let rooms = RoomTable::new(
            &[RoomConfig {
                id: RoomId::Kitchen,
                name: "Kitchen".into(),
            }],
            &[RoomAssoc {
                room: RoomId::Kitchen,
                addr: mijia(2),
            }],
        );
        let reg = registry_with(4, rooms);
        reg.find_or_register(&mijia(1)).unwrap();
        let kitchen = reg.find_or_register(&mijia(2)).unwrap();
        assert_eq!(kitchen.room().unwrap().id(), RoomId::Kitchen);
        assert_eq!(reg.rooms().get(RoomId::Kitchen).unwrap().device_count(), 1);

        let mut seen = Vec::new();
        reg.iterate(
            &DeviceFilter::new().with_room(RoomId::Kitchen),
            IterOptions::default(),
            |dev, _| {
                seen.push(dev.sdevuid().get());
                ControlFlow::Continue(())
            },
        )
        .unwrap();
        // Devices without a room are not excluded by a room filter.
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn descriptor_counts() {
        let reg = registry(4);
        reg.find_or_register(&mijia(1)).unwrap();
        reg.find_or_register(&mijia(2)).unwrap();
        assert_eq!(reg.count_data_inputs(DataType::Temperature, None), 2);
        assert_eq!(
            reg.count_data_inputs(DataType::Humidity, Some(Assignment::BoardHumidity)),
            2
        );
        assert_eq!(reg.count_control_outputs(DataType::Temperature, None), 0);
    }
}
