// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hub and field-bus configuration.
//!
//! Both configurations have sensible defaults, `with_*` builder methods and
//! can be loaded from JSON. Missing JSON fields take their default value.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::{RoomAssoc, RoomConfig};
use crate::error::ConfigError;

/// Capacities of the hub pools and the room table.
///
/// # Examples
///
/// ```
/// use ha_hub::HubConfig;
///
/// let config = HubConfig::default()
///     .with_max_devices(8)
///     .with_max_events(32);
/// assert!(config.validate().is_ok());
///
/// let config = HubConfig::from_json(r#"{ "max_devices": 4, "max_subscriptions": 2 }"#)?;
/// assert_eq!(config.max_devices, 4);
/// assert_eq!(config.max_events, HubConfig::default().max_events);
/// # Ok::<(), ha_hub::error::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Maximum number of registered devices.
    pub max_devices: usize,
    /// Maximum number of live events.
    pub max_events: usize,
    /// Maximum number of live subscriptions.
    pub max_subscriptions: usize,
    /// Bytes available for decoded event data.
    pub data_heap_limit: usize,
    /// Rooms devices can be placed in.
    pub rooms: Vec<RoomConfig>,
    /// Static device to room associations.
    pub room_assocs: Vec<RoomAssoc>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_devices: 32,
            max_events: 64,
            max_subscriptions: 8,
            data_heap_limit: 4096,
            rooms: Vec::new(),
            room_assocs: Vec::new(),
        }
    }
}

impl HubConfig {
    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] if the document does not parse and
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the device list capacity.
    #[must_use]
    pub fn with_max_devices(mut self, max: usize) -> Self {
        self.max_devices = max;
        self
    }

    /// Sets the event pool capacity.
    #[must_use]
    pub fn with_max_events(mut self, max: usize) -> Self {
        self.max_events = max;
        self
    }

    /// Sets the subscription pool capacity.
    #[must_use]
    pub fn with_max_subscriptions(mut self, max: usize) -> Self {
        self.max_subscriptions = max;
        self
    }

    /// Sets the decoded-data budget in bytes.
    #[must_use]
    pub fn with_data_heap_limit(mut self, bytes: usize) -> Self {
        self.data_heap_limit = bytes;
        self
    }

    /// Declares a room.
    #[must_use]
    pub fn with_room(mut self, room: RoomConfig) -> Self {
        self.rooms.push(room);
        self
    }

    /// Places a device address in a room.
    #[must_use]
    pub fn with_room_assoc(mut self, assoc: RoomAssoc) -> Self {
        self.room_assocs.push(assoc);
        self
    }

    /// Checks every value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero capacity or an
    /// association to an undeclared room.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("max_devices", self.max_devices)?;
        non_zero("max_events", self.max_events)?;
        non_zero("max_subscriptions", self.max_subscriptions)?;

        if let Some(assoc) = self
            .room_assocs
            .iter()
            .find(|a| !self.rooms.iter().any(|r| r.id == a.room))
        {
            return Err(ConfigError::Invalid {
                field: "room_assocs",
                message: format!("{} is placed in undeclared room {:?}", assoc.addr, assoc.room),
            });
        }
        Ok(())
    }
}

/// Field-bus query multiplexer settings.
///
/// Durations are stored in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Maximum number of queries waiting for an answer.
    pub max_pending_queries: usize,
    /// Extra time a caller waits past its timeout for the worker to signal.
    pub tolerance_ms: u64,
    /// Longest accepted query timeout.
    pub max_query_timeout_ms: u64,
    /// Depth of the submission channel.
    pub submission_depth: usize,
    /// Depth of the inbound frame channel.
    pub frame_depth: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_pending_queries: 4,
            tolerance_ms: 1_000,
            max_query_timeout_ms: 60_000,
            submission_depth: 8,
            frame_depth: 16,
        }
    }
}

impl BusConfig {
    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] if the document does not parse and
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the pending-query pool capacity.
    #[must_use]
    pub fn with_max_pending_queries(mut self, max: usize) -> Self {
        self.max_pending_queries = max;
        self
    }

    /// Sets the caller tolerance.
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance_ms = duration_ms(tolerance);
        self
    }

    /// Sets the longest accepted query timeout.
    #[must_use]
    pub fn with_max_query_timeout(mut self, timeout: Duration) -> Self {
        self.max_query_timeout_ms = duration_ms(timeout);
        self
    }

    /// Sets the submission channel depth.
    #[must_use]
    pub fn with_submission_depth(mut self, depth: usize) -> Self {
        self.submission_depth = depth;
        self
    }

    /// Sets the inbound frame channel depth.
    #[must_use]
    pub fn with_frame_depth(mut self, depth: usize) -> Self {
        self.frame_depth = depth;
        self
    }

    /// Returns the caller tolerance.
    #[must_use]
    pub fn tolerance(&self) -> Duration {
        Duration::from_millis(self.tolerance_ms)
    }

    /// Checks every value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero capacity, channel depth or
    /// maximum timeout, and for a submission queue shallower than the
    /// pending-query pool.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("max_pending_queries", self.max_pending_queries)?;
        non_zero("submission_depth", self.submission_depth)?;
        non_zero("frame_depth", self.frame_depth)?;
        if self.submission_depth < self.max_pending_queries {
            return Err(ConfigError::Invalid {
                field: "submission_depth",
                message: format!(
                    "{} is below max_pending_queries ({})",
                    self.submission_depth, self.max_pending_queries
                ),
            });
        }
        if self.max_query_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "max_query_timeout_ms",
                message: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

fn non_zero(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            field,
            message: "must be greater than zero".into(),
        });
    }
    Ok(())
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
