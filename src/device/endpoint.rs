// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Endpoints and device capability tables.
//!
//! An endpoint is a data channel inside a device with its own payload shape.
//! Its behaviour is described by a static [`EndpointConfig`]; the one piece
//! of mutable state (the retained last event) lives on the
//! [`Device`](super::Device).
//!
//! A [`DeviceApi`] is the capability table of a device type. It declares the
//! endpoints of a freshly registered device and routes each payload to one of
//! them.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::DeviceAddr;
use crate::data::{DataDescr, DataType, DataValue, Dataset, descr_has_type};
use crate::error::IngestError;

/// Maximum number of endpoints per device.
pub const MAX_ENDPOINTS: usize = 2;

/// Identifier of an endpoint kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointId {
    /// Undefined, or any endpoint when used as a filter.
    #[default]
    None,
    /// Xiaomi thermometer measurements.
    XiaomiMijia,
    /// Gateway board die temperature.
    NucleoF429zi,
    /// Field-bus board-level control, class 0 to 7.
    CaniotBlc(u8),
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::XiaomiMijia => f.write_str("xiaomi_mijia"),
            Self::NucleoF429zi => f.write_str("nucleo_f429zi"),
            Self::CaniotBlc(class) => write!(f, "caniot_blc{class}"),
        }
    }
}

/// A raw payload handed to the hub by a transport driver.
#[derive(Debug, Clone, Copy)]
pub struct Payload<'a> {
    /// Raw bytes, in the transport's own layout.
    pub bytes: &'a [u8],
    /// UNIX timestamp in seconds, or 0 for "now".
    pub timestamp: u32,
}

impl<'a> Payload<'a> {
    /// Creates a payload.
    #[must_use]
    pub const fn new(bytes: &'a [u8], timestamp: u32) -> Self {
        Self { bytes, timestamp }
    }
}

/// Output of an endpoint decode function.
#[derive(Debug)]
pub struct Decoded {
    /// Structured data.
    pub data: Box<dyn Dataset>,
    /// Effective timestamp, if the payload carried a better one.
    pub timestamp: Option<u32>,
}

impl Decoded {
    /// Wraps a dataset, keeping the payload timestamp.
    #[must_use]
    pub fn new<D: Dataset>(data: D) -> Self {
        Self {
            data: Box::new(data),
            timestamp: None,
        }
    }
}

/// Decodes a raw payload into a dataset.
pub type IngestFn = fn(&Payload<'_>) -> Result<Decoded, IngestError>;

/// Encodes a command value into the bytes to send to the device.
pub type CommandFn = fn(&DataValue) -> Result<Vec<u8>, IngestError>;

/// Immutable endpoint configuration.
#[derive(Debug, Clone, Copy)]
pub struct EndpointConfig {
    /// Endpoint kind.
    pub id: EndpointId,
    /// Expected raw payload size, 0 when unspecified.
    pub expected_payload_size: usize,
    /// Bytes of decoded data charged to the data budget per event.
    pub data_size: usize,
    /// Decode function.
    pub ingest: IngestFn,
    /// Command encoder, if the endpoint accepts commands.
    pub command: Option<CommandFn>,
    /// Data fields produced by `ingest`.
    pub data_descr: &'static [DataDescr],
    /// Fields accepted by `command`.
    pub cmd_descr: &'static [DataDescr],
    /// Keep the most recent data event on the device.
    pub retain_last_event: bool,
}

impl EndpointConfig {
    /// Returns true if the endpoint produces values of `data_type`.
    #[must_use]
    pub fn has_data_type(&self, data_type: DataType) -> bool {
        descr_has_type(self.data_descr, data_type)
    }

    /// Returns true if the endpoint accepts commands.
    #[must_use]
    pub fn supports_commands(&self) -> bool {
        self.command.is_some() && !self.cmd_descr.is_empty()
    }
}

/// Capability table of a device type.
pub trait DeviceApi: Send + Sync {
    /// Declares the endpoints of a device being registered.
    ///
    /// # Errors
    ///
    /// Returns a description of the failure if the device cannot be set up.
    fn init_endpoints(&self, addr: &DeviceAddr) -> Result<Vec<&'static EndpointConfig>, String>;

    /// Picks the endpoint index a payload belongs to. Defaults to index 0.
    fn select_endpoint(&self, _payload: &Payload<'_>) -> Option<usize> {
        Some(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Assignment;

    fn never(_: &Payload<'_>) -> Result<Decoded, IngestError> {
        Err(IngestError::Decode("unused".into()))
    }

    fn echo(value: &DataValue) -> Result<Vec<u8>, IngestError> {
        serde_json::to_vec(value).map_err(|e| IngestError::Command(e.to_string()))
    }

    const TEMP: &[DataDescr] = &[DataDescr::new(
        DataType::Temperature,
        Assignment::BoardTemperature,
    )];

    #[test]
    fn endpoint_capabilities() {
        let mut cfg = EndpointConfig {
            id: EndpointId::CaniotBlc(1),
            expected_payload_size: 8,
            data_size: 16,
            ingest: never,
            command: None,
            data_descr: TEMP,
            cmd_descr: &[],
            retain_last_event: true,
        };
        assert!(cfg.has_data_type(DataType::Temperature));
        assert!(!cfg.has_data_type(DataType::Humidity));
        assert!(!cfg.supports_commands());

        cfg.command = Some(echo);
        cfg.cmd_descr = TEMP;
        assert!(cfg.supports_commands());
    }

    #[test]
    fn endpoint_id_display() {
        assert_eq!(EndpointId::CaniotBlc(3).to_string(), "caniot_blc3");
        assert_eq!(EndpointId::XiaomiMijia.to_string(), "xiaomi_mijia");
        assert_eq!(EndpointId::NucleoF429zi.to_string(), "nucleo_f429zi");
        assert_eq!(EndpointId::None.to_string(), "none");
    }
}
