// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device addressing.
//!
//! A [`DeviceAddr`] is the pair of a [`DeviceType`] and a transport-level
//! [`MacAddr`]. The [`Medium`] is derived from the MAC variant, so an address
//! can never claim to be on the radio while carrying a bus id.
//!
//! Two addresses are compared with a comparator resolved by double dispatch:
//! the device type may override comparison (field-bus boards compare their
//! device id only), otherwise the medium's generic comparator applies.
//! Addresses with neither are not comparable and are matched by device type.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Physical or transport layer a device address belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Medium {
    /// No addressable medium (on-board peripherals).
    #[default]
    None,
    /// Short-range radio (BLE).
    Ble,
    /// CAN field bus.
    Can,
}

impl fmt::Display for Medium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Ble => write!(f, "BLE"),
            Self::Can => write!(f, "CAN"),
        }
    }
}

/// Kind of device, selecting its capability table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// Unknown device.
    #[default]
    None,
    /// Xiaomi Mijia LYWSD03MMC thermometer.
    XiaomiMijia,
    /// Field-bus board.
    Caniot,
    /// Gateway board itself (die temperature).
    NucleoF429zi,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::XiaomiMijia => "xiaomi_mijia",
            Self::Caniot => "caniot",
            Self::NucleoF429zi => "nucleo_f429zi",
        };
        f.write_str(name)
    }
}

/// A BLE device address, most significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BleAddr([u8; 6]);

impl BleAddr {
    /// Creates an address from its six bytes, most significant first.
    #[must_use]
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for BleAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// A field-bus device id: 3-bit class and 3-bit sub-id.
///
/// # Examples
///
/// ```
/// use ha_hub::device::BusDeviceId;
///
/// let did = BusDeviceId::new(3, 0).unwrap();
/// assert_eq!(did.raw(), 0x18);
/// assert_eq!(did.to_string(), "0x18");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BusDeviceId(u8);

impl BusDeviceId {
    /// Highest class or sub-id value.
    pub const MAX_FIELD: u8 = 7;

    /// The broadcast id, addressing every device on the bus.
    pub const BROADCAST: Self = Self(0x3F);

    /// Creates an id from its class and sub-id, or `None` if either exceeds 7.
    #[must_use]
    pub const fn new(class: u8, sub_id: u8) -> Option<Self> {
        if class > Self::MAX_FIELD || sub_id > Self::MAX_FIELD {
            return None;
        }
        Some(Self((class << 3) | sub_id))
    }

    /// Creates an id from its 6-bit raw encoding. Upper bits are discarded.
    #[must_use]
    pub const fn from_raw(raw: u8) -> Self {
        Self(raw & 0x3F)
    }

    /// Returns the 6-bit encoding.
    #[must_use]
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Returns the device class.
    #[must_use]
    pub const fn class(self) -> u8 {
        self.0 >> 3
    }

    /// Returns the sub-id inside the class.
    #[must_use]
    pub const fn sub_id(self) -> u8 {
        self.0 & 0x07
    }

    /// Returns true for the broadcast id.
    #[must_use]
    pub const fn is_broadcast(self) -> bool {
        self.0 == Self::BROADCAST.0
    }
}

impl fmt::Display for BusDeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

/// A raw CAN identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanId {
    /// Identifier bits; only the low 11 (standard) or 29 (extended) count.
    pub id: u32,
    /// Extended (29-bit) identifier.
    pub extended: bool,
    /// Bus index on multi-bus gateways.
    pub bus: u8,
}

impl CanId {
    const STD_MASK: u32 = 0x7FF;
    const EXT_MASK: u32 = 0x1FFF_FFFF;

    /// Returns the identifier with the bits outside its format cleared.
    #[must_use]
    pub const fn masked(&self) -> u32 {
        if self.extended {
            self.id & Self::EXT_MASK
        } else {
            self.id & Self::STD_MASK
        }
    }
}

impl fmt::Display for CanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.extended {
            write!(f, "0x{:08x}", self.masked())
        } else {
            write!(f, "0x{:03x}", self.masked())
        }
    }
}

/// Transport-level address of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MacAddr {
    /// No address.
    #[default]
    None,
    /// BLE MAC address.
    Ble(BleAddr),
    /// Field-bus device id (carried on CAN).
    Bus(BusDeviceId),
    /// Raw CAN identifier.
    Can(CanId),
}

impl MacAddr {
    /// Returns the medium this address belongs to.
    #[must_use]
    pub const fn medium(&self) -> Medium {
        match self {
            Self::None => Medium::None,
            Self::Ble(_) => Medium::Ble,
            Self::Bus(_) | Self::Can(_) => Medium::Can,
        }
    }
}

/// Address comparator.
type AddrCmp = fn(&MacAddr, &MacAddr) -> bool;

fn bus_eq(a: &MacAddr, b: &MacAddr) -> bool {
    matches!((a, b), (MacAddr::Bus(x), MacAddr::Bus(y)) if x == y)
}

fn ble_eq(a: &MacAddr, b: &MacAddr) -> bool {
    matches!((a, b), (MacAddr::Ble(x), MacAddr::Ble(y)) if x == y)
}

fn can_eq(a: &MacAddr, b: &MacAddr) -> bool {
    matches!((a, b), (MacAddr::Can(x), MacAddr::Can(y)) if x.masked() == y.masked())
}

const fn type_comparator(device_type: DeviceType) -> Option<AddrCmp> {
    match device_type {
        DeviceType::Caniot => Some(bus_eq),
        _ => None,
    }
}

const fn medium_comparator(medium: Medium) -> Option<AddrCmp> {
    match medium {
        Medium::Ble => Some(ble_eq),
        Medium::Can => Some(can_eq),
        Medium::None => None,
    }
}

/// Full device address: type plus transport address.
///
/// # Examples
///
/// ```
/// use ha_hub::device::{BleAddr, DeviceAddr, DeviceType, Medium};
///
/// let addr = DeviceAddr::ble(DeviceType::XiaomiMijia, BleAddr::new([0xA4, 0xC1, 0x38, 0, 0, 1]));
/// assert_eq!(addr.medium(), Medium::Ble);
/// assert!(addr.is_valid());
/// assert_eq!(addr.to_string(), "A4:C1:38:00:00:01");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DeviceAddr {
    /// Device type.
    pub device_type: DeviceType,
    /// Transport address.
    pub mac: MacAddr,
}

impl DeviceAddr {
    /// Creates an address from its parts.
    #[must_use]
    pub const fn new(device_type: DeviceType, mac: MacAddr) -> Self {
        Self { device_type, mac }
    }

    /// BLE device address.
    #[must_use]
    pub const fn ble(device_type: DeviceType, addr: BleAddr) -> Self {
        Self::new(device_type, MacAddr::Ble(addr))
    }

    /// Field-bus board address.
    #[must_use]
    pub const fn bus(did: BusDeviceId) -> Self {
        Self::new(DeviceType::Caniot, MacAddr::Bus(did))
    }

    /// Raw CAN device address.
    #[must_use]
    pub const fn can(device_type: DeviceType, id: CanId) -> Self {
        Self::new(device_type, MacAddr::Can(id))
    }

    /// Address of a device with no medium, identified by its type alone.
    #[must_use]
    pub const fn local(device_type: DeviceType) -> Self {
        Self::new(device_type, MacAddr::None)
    }

    /// Returns the address medium.
    #[must_use]
    pub const fn medium(&self) -> Medium {
        self.mac.medium()
    }

    fn comparator(&self) -> Option<AddrCmp> {
        match type_comparator(self.device_type) {
            Some(cmp) => Some(cmp),
            None => medium_comparator(self.medium()),
        }
    }

    /// Returns true when the address has a type and a usable comparator.
    ///
    /// Invalid addresses are looked up by device type only.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.device_type != DeviceType::None && self.comparator().is_some()
    }

    /// Returns true if `other` designates the same device.
    ///
    /// Devices on different media never match. When `self` has no
    /// comparator, the device types are compared instead.
    #[must_use]
    pub fn same_device(&self, other: &Self) -> bool {
        if self.medium() != other.medium() {
            return false;
        }
        match self.comparator() {
            Some(cmp) if self.is_valid() && other.is_valid() => cmp(&self.mac, &other.mac),
            _ => self.device_type == other.device_type,
        }
    }
}

impl fmt::Display for DeviceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.mac {
            MacAddr::None => write!(f, "{}", self.device_type),
            MacAddr::Ble(addr) => write!(f, "{addr}"),
            MacAddr::Bus(did) => write!(f, "{did}"),
            MacAddr::Can(id) => write!(f, "{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mijia(last: u8) -> DeviceAddr {
        DeviceAddr::ble(
            DeviceType::XiaomiMijia,
            BleAddr::new([0xA4, 0xC1, 0x38, 0x00, 0x00, last]),
        )
    }

    #[test]
    fn medium_follows_mac() {
        assert_eq!(mijia(1).medium(), Medium::Ble);
        assert_eq!(
            DeviceAddr::bus(BusDeviceId::new(1, 2).unwrap()).medium(),
            Medium::Can
        );
        assert_eq!(DeviceAddr::local(DeviceType::NucleoF429zi).medium(), Medium::None);
    }

    #[test]
    fn ble_addresses_compare_bytes() {
        assert!(mijia(1).same_device(&mijia(1)));
        assert!(!mijia(1).same_device(&mijia(2)));
    }

    #[test]
    fn bus_type_overrides_can_comparator() {
        let a = DeviceAddr::bus(BusDeviceId::new(3, 0).unwrap());
        let b = DeviceAddr::bus(BusDeviceId::from_raw(0x18));
        let c = DeviceAddr::bus(BusDeviceId::new(3, 1).unwrap());
        assert!(a.same_device(&b));
        assert!(!a.same_device(&c));
    }

    #[test]
    fn can_ids_compare_masked() {
        let a = DeviceAddr::can(
            DeviceType::XiaomiMijia,
            CanId {
                id: 0x123,
                extended: false,
                bus: 0,
            },
        );
        let b = DeviceAddr::can(
            DeviceType::XiaomiMijia,
            CanId {
                id: 0xF123,
                extended: false,
                bus: 0,
            },
        );
        assert!(a.same_device(&b));
    }

    #[test]
    fn local_addresses_are_invalid_and_match_by_type() {
        let a = DeviceAddr::local(DeviceType::NucleoF429zi);
        assert!(!a.is_valid());
        assert!(a.same_device(&DeviceAddr::local(DeviceType::NucleoF429zi)));
        assert!(!a.same_device(&DeviceAddr::local(DeviceType::XiaomiMijia)));
    }

    #[test]
    fn different_media_never_match() {
        let ble = DeviceAddr::ble(DeviceType::Caniot, BleAddr::new([0; 6]));
        let bus = DeviceAddr::bus(BusDeviceId::from_raw(0));
        assert!(!ble.same_device(&bus));
    }

    #[test]
    fn bus_device_id_fields() {
        let did = BusDeviceId::new(5, 3).unwrap();
        assert_eq!(did.class(), 5);
        assert_eq!(did.sub_id(), 3);
        assert!(BusDeviceId::new(8, 0).is_none());
        assert!(BusDeviceId::BROADCAST.is_broadcast());
    }

    #[test]
    fn display_per_medium() {
        assert_eq!(mijia(0xAB).to_string(), "A4:C1:38:00:00:AB");
        assert_eq!(
            DeviceAddr::can(
                DeviceType::None,
                CanId {
                    id: 0x1234_5678,
                    extended: true,
                    bus: 0
                }
            )
            .to_string(),
            "0x12345678"
        );
        assert_eq!(
            DeviceAddr::local(DeviceType::NucleoF429zi).to_string(),
            "nucleo_f429zi"
        );
    }
}
