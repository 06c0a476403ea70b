// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session-unique device id.
///
/// Assigned at registration from a monotonic counter starting at 1. An id is
/// never handed out twice during the life of a hub, which makes it a stable
/// join key for per-device state such as extended filter tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionDeviceId(u32);

impl SessionDeviceId {
    /// The first id handed out by a registry.
    pub const FIRST: Self = Self(1);

    /// Wraps a raw id.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Returns the id following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for SessionDeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Random identifier given to a device at registration.
///
/// Unlike [`SessionDeviceId`] it carries no ordering and is meant for
/// external consumers (REST paths, cloud shadows).
///
/// # Examples
///
/// ```
/// use ha_hub::device::DeviceUuid;
///
/// let a = DeviceUuid::new();
/// let b = DeviceUuid::new();
/// assert_ne!(a, b);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceUuid(Uuid);

impl DeviceUuid {
    /// Generates a new random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for DeviceUuid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DeviceUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = &self.0.simple().to_string()[..8];
        write!(f, "DeviceUuid({short}..)")
    }
}

impl fmt::Display for DeviceUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for DeviceUuid {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_monotonic() {
        let first = SessionDeviceId::FIRST;
        assert_eq!(first.get(), 1);
        assert_eq!(first.next().get(), 2);
        assert!(first < first.next());
    }

    #[test]
    fn uuid_debug_is_short() {
        let debug = format!("{:?}", DeviceUuid::new());
        assert!(debug.starts_with("DeviceUuid("));
        assert_eq!(debug.len(), "DeviceUuid(12345678..)".len());
    }

    #[test]
    fn uuid_display_is_hyphenated() {
        let uuid = Uuid::parse_str("a1a2a3a4-b1b2-c1c2-d1d2-d3d4d5d6d7d8").unwrap();
        assert_eq!(
            DeviceUuid::from(uuid).to_string(),
            "a1a2a3a4-b1b2-c1c2-d1d2-d3d4d5d6d7d8"
        );
    }
}
