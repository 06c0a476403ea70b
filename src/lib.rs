// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `ha_hub` - Device and event hub for a home-automation gateway.
//!
//! Payloads received from heterogeneous devices (BLE sensors, field-bus
//! boards, the gateway itself) are decoded into typed, reference-counted
//! events and delivered to every interested subscriber. A separate
//! multiplexer serializes request/response queries on the field bus.
//!
//! # Features
//!
//! - **Device registry**: Devices register themselves on first payload and
//!   get a session id, a UUID and an optional room
//! - **Typed events**: Each device type declares the data its endpoints
//!   produce; events carry the decoded dataset and its field assignments
//! - **Publish/subscribe**: Subscriptions filter by device type, address,
//!   event kind or any predicate, and queue matching events
//! - **Extended filters**: Per-device duplicate, count, interval and
//!   subsampling filters
//! - **Field-bus queries**: `query()` with timeout, multiplexed on a single
//!   worker owning the protocol
//! - **Bounded memory**: Events, subscriptions, devices and decoded data all
//!   come from fixed-size pools
//!
//! # Supported Devices
//!
//! - Xiaomi Mijia LYWSD03MMC BLE thermometers
//! - CANIOT board-level controllers (classes 0 to 7) on the field bus
//! - The gateway's own die temperature sensor
//!
//! # Quick Start
//!
//! ```no_run
//! use ha_hub::{Hub, HubConfig};
//! use ha_hub::device::DeviceType;
//! use ha_hub::subscription::SubscriptionConf;
//!
//! #[tokio::main]
//! async fn main() -> ha_hub::Result<()> {
//!     let hub = Hub::new(HubConfig::default())?;
//!
//!     let sub = hub.subscribe(
//!         SubscriptionConf::new().with_device_type(DeviceType::XiaomiMijia),
//!     )?;
//!
//!     while let Some(event) = sub.wait(None).await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Field-Bus Queries
//!
//! ```no_run
//! use ha_hub::{BusConfig, Hub, HubConfig};
//! use ha_hub::bus::{BusController, BusEndpoint, BusFrame, CaniotProtocol};
//! use ha_hub::device::BusDeviceId;
//!
//! #[tokio::main]
//! async fn main() -> ha_hub::Result<()> {
//!     let hub = Hub::new(HubConfig::default())?;
//!     let (to_driver, _driver_rx) = tokio::sync::mpsc::channel(16);
//!
//!     // Board telemetry received on the bus is fed into the hub
//!     let bus = BusController::spawn(CaniotProtocol::new(to_driver), BusConfig::default(), Some(hub))?;
//!
//!     let did = BusDeviceId::new(0, 1).unwrap();
//!     let reply = bus
//!         .query(did, BusFrame::telemetry_query(did, BusEndpoint::BoardControl), 1000)
//!         .await?;
//!     println!("{:?} in {:?}", reply.status, reply.elapsed);
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod data;
pub mod device;
pub mod error;
pub mod event;
mod hub;
pub mod pool;
pub mod stats;
pub mod subscription;

pub use config::{BusConfig, HubConfig};
pub use error::{Error, Result};
pub use hub::{Hub, HubBuilder};
