// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Rooms and the device-to-room association table.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use super::DeviceAddr;

/// Identifier of a room of the house.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum RoomId {
    #[default]
    None,
    Entrance,
    LivingRoom,
    Kitchen,
    DiningRoom,
    Stairs,
    Bathroom,
    Toilet,
    StoreRoom,
    GarageLeft,
    GarageRight,
    GarageBack,
    Workshop,
    BoilerRoom,
    Laundry,
    FloorCorridor,
    FloorBathroom,
    FloorToilet,
    Office,
    GamesRoom,
    Bedroom1,
    Bedroom1Dressing,
    Bedroom2,
    Bedroom3,
    FloorStairs,
    LoftOffice,
    LoftKitchen,
    LoftBedroom,
    LoftDressing,
    AtticSouth,
    AtticNorth,
}

/// A room with a running count of the devices registered in it.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    name: String,
    devices: AtomicUsize,
}

impl Room {
    /// Creates an empty room.
    #[must_use]
    pub fn new(id: RoomId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            devices: AtomicUsize::new(0),
        }
    }

    /// Returns the room id.
    #[must_use]
    pub fn id(&self) -> RoomId {
        self.id
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of devices registered in the room.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.devices.load(Ordering::Relaxed)
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Room declaration, as found in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Room id.
    pub id: RoomId,
    /// Display name.
    pub name: String,
}

/// Static association of a device address with a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomAssoc {
    /// Room the device sits in.
    pub room: RoomId,
    /// Device address.
    pub addr: DeviceAddr,
}

/// Rooms plus the address associations used to place new devices.
#[derive(Debug, Default)]
pub struct RoomTable {
    rooms: Vec<Arc<Room>>,
    assocs: Vec<RoomAssoc>,
}

impl RoomTable {
    /// Builds a table from its configuration.
    #[must_use]
    pub fn new(rooms: &[RoomConfig], assocs: &[RoomAssoc]) -> Self {
        Self {
            rooms: rooms
                .iter()
                .map(|r| Arc::new(Room::new(r.id, r.name.clone())))
                .collect(),
            assocs: assocs.to_vec(),
        }
    }

    /// Returns the room with the given id.
    #[must_use]
    pub fn get(&self, id: RoomId) -> Option<&Arc<Room>> {
        self.rooms.iter().find(|room| room.id == id)
    }

    /// Returns every room.
    #[must_use]
    pub fn rooms(&self) -> &[Arc<Room>] {
        &self.rooms
    }

    /// Finds the room of a device being registered and counts the device in.
    pub(crate) fn assign(&self, addr: &DeviceAddr) -> Option<Arc<Room>> {
        let assoc = self.assocs.iter().find(|a| a.addr.same_device(addr))?;
        let room = self.get(assoc.room)?;
        room.devices.fetch_add(1, Ordering::Relaxed);
        Some(Arc::clone(room))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{BleAddr, DeviceType};

    fn table() -> RoomTable {
        RoomTable::new(
            &[
                RoomConfig {
                    id: RoomId::Kitchen,
                    name: "Kitchen".into(),
                },
                RoomConfig {
                    id: RoomId::Office,
                    name: "Office".into(),
                },
            ],
            &[RoomAssoc {
                room: RoomId::Kitchen,
                addr: DeviceAddr::ble(DeviceType::XiaomiMijia, BleAddr::new([1, 2, 3, 4, 5, 6])),
            }],
        )
    }

    #[test]
    fn assign_counts_devices() {
        let table = table();
        let addr = DeviceAddr::ble(DeviceType::XiaomiMijia, BleAddr::new([1, 2, 3, 4, 5, 6]));

        let room = table.assign(&addr).unwrap();
        assert_eq!(room.id(), RoomId::Kitchen);
        assert_eq!(room.device_count(), 1);
        assert_eq!(table.get(RoomId::Office).unwrap().device_count(), 0);
    }

    #[test]
    fn unknown_address_has_no_room() {
        let table = table();
        let addr = DeviceAddr::ble(DeviceType::XiaomiMijia, BleAddr::new([9; 6]));
        assert!(table.assign(&addr).is_none());
    }

    #[test]
    fn room_id_serde_names() {
        let json = serde_json::to_string(&RoomId::Bedroom1Dressing).unwrap();
        assert_eq!(json, "\"bedroom1_dressing\"");
    }
}
