// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Devices, endpoints and the device registry.
//!
//! A device is identified by its [`DeviceAddr`]. The first payload received
//! for an unseen address registers the device: the registry resolves the
//! [`DeviceApi`] of its type, lets it declare endpoints, and places the
//! device in a room if the address is listed in the room table.
//!
//! ```
//! use std::ops::ControlFlow;
//! use ha_hub::{Hub, HubConfig};
//! use ha_hub::device::{BleAddr, DeviceAddr, DeviceFilter, DeviceType, IterOptions, Medium};
//!
//! let hub = Hub::new(HubConfig::default()).unwrap();
//! let addr = DeviceAddr::ble(DeviceType::XiaomiMijia, BleAddr::new([0xA4, 0xC1, 0x38, 1, 2, 3]));
//! hub.registry().find_or_register(&addr).unwrap();
//!
//! let count = hub
//!     .iterate(&DeviceFilter::new().with_medium(Medium::Ble), IterOptions::default(), |dev, _| {
//!         println!("{} {}", dev.sdevuid(), dev.addr());
//!         ControlFlow::Continue(())
//!     })
//!     .unwrap();
//! assert_eq!(count, 1);
//! ```

mod address;
mod endpoint;
mod ids;
mod record;
mod registry;
mod room;

pub use address::{BleAddr, BusDeviceId, CanId, DeviceAddr, DeviceType, MacAddr, Medium};
pub use endpoint::{
    CommandFn, Decoded, DeviceApi, EndpointConfig, EndpointId, IngestFn, MAX_ENDPOINTS, Payload,
};
pub use ids::{DeviceUuid, SessionDeviceId};
pub use record::{Device, DeviceStats, ErrorFlags};
pub use registry::{DeviceFilter, IterOptions, PinnedEvents, Registry};
pub use room::{Room, RoomAssoc, RoomConfig, RoomId, RoomTable};
