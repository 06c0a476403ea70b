// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Field-bus (CANIOT) boards.
//!
//! Each board exposes one board-level control endpoint whose id follows the
//! board class. The telemetry frame is 8 bytes:
//!
//! | byte | content |
//! |------|---------|
//! | 0    | digital I/O levels (oc1, oc2, rl1, rl2, in1..in4) |
//! | 1    | pulse states of the outputs |
//! | 2..7 | four 10-bit temperatures, little-endian bit packing |
//!
//! A raw 10-bit temperature `t` encodes `t / 10 - 28` °C; `0x3FF` means the
//! probe is absent.

use crate::data::{
    Assignment, DataDescr, DataType, DataValue, Dataset, Digital, SensorType, Temperature,
};
use crate::device::{
    BusDeviceId, Decoded, DeviceAddr, DeviceApi, EndpointConfig, EndpointId, MacAddr, Payload,
};
use crate::error::IngestError;
use crate::hub::Hub;

/// Size of a board-level telemetry frame.
pub const TELEMETRY_SIZE: usize = 8;

/// Size of a board-level command frame.
pub const COMMAND_SIZE: usize = 8;

/// Number of temperature probes in a telemetry frame.
pub const MAX_TEMPERATURES: usize = 4;

const T10_INVALID: u16 = 0x3FF;

/// Converts a raw 10-bit temperature into 1e-2 °C.
#[must_use]
pub fn t10_to_centi(raw: u16) -> Option<i16> {
    if raw >= T10_INVALID {
        return None;
    }
    // raw < 0x3FF, so the result always fits.
    i16::try_from(i32::from(raw) * 10 - 2_800).ok()
}

/// Converts 1e-2 °C into a raw 10-bit temperature, saturating at the range.
#[must_use]
pub fn centi_to_t10(centi: i16) -> u16 {
    let raw = (i32::from(centi) + 2_800) / 10;
    u16::try_from(raw.clamp(0, i32::from(T10_INVALID) - 1)).unwrap_or(0)
}

/// Decoded board-level telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoardTelemetry {
    /// Temperatures: on-board sensor first, then external probes.
    pub temperatures: [Option<Temperature>; MAX_TEMPERATURES],
    /// Digital I/O levels.
    pub dio: u8,
    /// Output pulse states.
    pub pdio: u8,
}

impl BoardTelemetry {
    /// Encodes the telemetry frame.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; TELEMETRY_SIZE] {
        let mut packed: u64 = 0;
        for (i, temp) in self.temperatures.iter().enumerate() {
            let raw = temp.map_or(T10_INVALID, |t| centi_to_t10(t.value));
            packed |= u64::from(raw) << (10 * i);
        }
        let mut buf = [0u8; TELEMETRY_SIZE];
        buf[0] = self.dio;
        buf[1] = self.pdio;
        buf[2..].copy_from_slice(&packed.to_le_bytes()[..6]);
        buf
    }

    /// Decodes a telemetry frame.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; TELEMETRY_SIZE]) -> Self {
        let mut raw = [0u8; 8];
        raw[..6].copy_from_slice(&bytes[2..]);
        let packed = u64::from_le_bytes(raw);

        let mut temperatures = [None; MAX_TEMPERATURES];
        for (i, slot) in temperatures.iter_mut().enumerate() {
            let t10 = u16::try_from((packed >> (10 * i)) & 0x3FF).unwrap_or(T10_INVALID);
            *slot = t10_to_centi(t10).map(|value| Temperature {
                value,
                sensor: sensor_for(i),
            });
        }

        Self {
            temperatures,
            dio: bytes[0],
            pdio: bytes[1],
        }
    }
}

fn sensor_for(index: usize) -> SensorType {
    match index {
        0 => SensorType::Embedded,
        1 => SensorType::External1,
        2 => SensorType::External2,
        _ => SensorType::External3,
    }
}

const BLT_DESCR: &[DataDescr] = &[
    DataDescr::named("int", DataType::Temperature, Assignment::BoardTemperature),
    DataDescr::named("ext1", DataType::Temperature, Assignment::ExternalTemperature),
    DataDescr::named("ext2", DataType::Temperature, Assignment::ExternalTemperature),
    DataDescr::named("ext3", DataType::Temperature, Assignment::ExternalTemperature),
    DataDescr::named("dio", DataType::DigitalInOut, Assignment::DigitalIo),
    DataDescr::named("pdio", DataType::DigitalOut, Assignment::DigitalIo),
];

const BLC_CMD_DESCR: &[DataDescr] = &[
    DataDescr::named("oc", DataType::DigitalOut, Assignment::OpenCollector),
    DataDescr::named("rl", DataType::DigitalOut, Assignment::Relay),
];

impl Dataset for BoardTelemetry {
    fn descriptors(&self) -> &'static [DataDescr] {
        BLT_DESCR
    }

    fn value(&self, index: usize) -> Option<DataValue> {
        match index {
            0..MAX_TEMPERATURES => self.temperatures[index].map(DataValue::Temperature),
            4 => Some(DataValue::Digital(
                DataType::DigitalInOut,
                Digital {
                    value: u32::from(self.dio),
                    mask: 0xFF,
                },
            )),
            5 => Some(DataValue::Digital(
                DataType::DigitalOut,
                Digital {
                    value: u32::from(self.pdio),
                    mask: 0x0F,
                },
            )),
            _ => None,
        }
    }
}

/// Output action encoded in a board-level command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OutputCommand {
    /// Leave the output unchanged.
    None = 0,
    /// Switch on.
    SetOn = 1,
    /// Switch off.
    SetOff = 2,
    /// Switch on for a pulse.
    PulseOn = 3,
    /// Switch off for a pulse.
    PulseOff = 4,
    /// Toggle.
    Toggle = 5,
    /// Back to the default state.
    Reset = 6,
}

/// Encodes per-output commands (oc1, oc2, rl1, rl2) into a command frame.
#[must_use]
pub fn encode_outputs(outputs: [OutputCommand; 4]) -> [u8; COMMAND_SIZE] {
    let packed = outputs
        .iter()
        .enumerate()
        .fold(0u64, |acc, (i, cmd)| acc | (u64::from(*cmd as u8) << (3 * i)));
    packed.to_le_bytes()
}

/// Board-level command encoder.
///
/// Accepts digital output values: each masked pin among the four outputs is
/// switched on or off according to its level; unmasked pins are untouched.
fn command(value: &DataValue) -> Result<Vec<u8>, IngestError> {
    let DataValue::Digital(DataType::DigitalOut, digital) = value else {
        return Err(IngestError::Command(format!(
            "unsupported command type {:?}",
            value.data_type()
        )));
    };

    let mut outputs = [OutputCommand::None; 4];
    for (pin, out) in (0u8..).zip(outputs.iter_mut()) {
        *out = match digital.pin(pin) {
            Some(true) => OutputCommand::SetOn,
            Some(false) => OutputCommand::SetOff,
            None => OutputCommand::None,
        };
    }
    Ok(encode_outputs(outputs).to_vec())
}

fn ingest(payload: &Payload<'_>) -> Result<Decoded, IngestError> {
    let frame: &[u8; TELEMETRY_SIZE] = payload
        .bytes
        .try_into()
        .map_err(|_| IngestError::Decode("truncated board telemetry".into()))?;
    Ok(Decoded::new(BoardTelemetry::from_bytes(frame)))
}

const fn blc(class: u8) -> EndpointConfig {
    EndpointConfig {
        id: EndpointId::CaniotBlc(class),
        expected_payload_size: TELEMETRY_SIZE,
        data_size: size_of::<BoardTelemetry>(),
        ingest,
        command: Some(command),
        data_descr: BLT_DESCR,
        cmd_descr: BLC_CMD_DESCR,
        retain_last_event: true,
    }
}

static BLC_ENDPOINTS: [EndpointConfig; 8] =
    [blc(0), blc(1), blc(2), blc(3), blc(4), blc(5), blc(6), blc(7)];

/// Capability table of field-bus boards.
#[derive(Debug, Default)]
pub struct CaniotApi;

impl DeviceApi for CaniotApi {
    fn init_endpoints(&self, addr: &DeviceAddr) -> Result<Vec<&'static EndpointConfig>, String> {
        let MacAddr::Bus(did) = addr.mac else {
            return Err(format!("not a field-bus address: {addr}"));
        };
        if did.is_broadcast() {
            return Err("broadcast id cannot be registered".into());
        }
        Ok(vec![&BLC_ENDPOINTS[usize::from(did.class())]])
    }
}

/// Feeds a board-level telemetry frame into the hub.
///
/// # Errors
///
/// Returns an error if the board cannot be registered or the frame cannot be
/// ingested.
pub fn register_bus_telemetry(
    hub: &Hub,
    did: BusDeviceId,
    frame: &[u8; TELEMETRY_SIZE],
    timestamp: u32,
) -> crate::Result<usize> {
    hub.register_data(&DeviceAddr::bus(did), frame, timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t10_conversion() {
        assert_eq!(t10_to_centi(480), Some(2_000));
        assert_eq!(t10_to_centi(0), Some(-2_800));
        assert_eq!(t10_to_centi(0x3FF), None);
        assert_eq!(centi_to_t10(2_000), 480);
        assert_eq!(centi_to_t10(i16::MAX), 0x3FE);
    }

    #[test]
    fn telemetry_frame_layout() {
        let blt = BoardTelemetry {
            temperatures: [
                Some(Temperature {
                    value: 2_150,
                    sensor: SensorType::Embedded,
                }),
                None,
                Some(Temperature {
                    value: -500,
                    sensor: SensorType::External2,
                }),
                None,
            ],
            dio: 0b1010_0101,
            pdio: 0b0001,
        };
        let bytes = blt.to_bytes();
        assert_eq!(bytes[0], 0b1010_0101);
        assert_eq!(bytes[1], 0b0001);
        assert_eq!(BoardTelemetry::from_bytes(&bytes), blt);
    }

    #[test]
    fn telemetry_fields_skip_absent_probes() {
        let blt = BoardTelemetry {
            temperatures: [
                Some(Temperature {
                    value: 1_900,
                    sensor: SensorType::Embedded,
                }),
                None,
                None,
                None,
            ],
            dio: 0,
            pdio: 0,
        };
        let names: Vec<_> = blt.fields().iter().filter_map(|f| f.descr.name).collect();
        assert_eq!(names, vec!["int", "dio", "pdio"]);
    }

    #[test]
    fn command_encodes_masked_outputs() {
        let value = DataValue::Digital(
            DataType::DigitalOut,
            Digital {
                value: 0b0001,
                mask: 0b1001,
            },
        );
        let bytes = command(&value).unwrap();
        // oc1 = SetOn (1), oc2 = none, rl1 = none, rl2 = SetOff (2 << 9).
        let packed = u64::from_le_bytes(bytes.try_into().unwrap());
        assert_eq!(packed, 1 | (2 << 9));
    }

    #[test]
    fn command_rejects_other_types() {
        let value = DataValue::Analog(crate::data::Analog { value_uv: 1 });
        assert!(matches!(command(&value), Err(IngestError::Command(_))));
    }

    #[test]
    fn endpoint_follows_board_class() {
        let did = BusDeviceId::new(3, 1).unwrap();
        let eps = CaniotApi.init_endpoints(&DeviceAddr::bus(did)).unwrap();
        assert_eq!(eps[0].id, EndpointId::CaniotBlc(3));
        assert!(
            CaniotApi
                .init_endpoints(&DeviceAddr::bus(BusDeviceId::BROADCAST))
                .is_err()
        );
    }
}
