// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Xiaomi Mijia LYWSD03MMC thermometers, received over BLE.

use crate::data::{
    Assignment, BatteryLevel, DataDescr, DataType, DataValue, Dataset, Humidity, Rssi,
    SensorType, Temperature,
};
use crate::device::{
    BleAddr, Decoded, DeviceAddr, DeviceApi, DeviceType, EndpointConfig, EndpointId, Payload,
};
use crate::error::IngestError;
use crate::hub::Hub;

/// Size of an encoded [`XiaomiRecord`].
pub const RECORD_SIZE: usize = 12;

/// A measurement record as produced by the BLE scanner.
///
/// Encoded little-endian: time (u32), rssi (i8), temperature (i16, 1e-2 °C),
/// humidity (u16, 1e-2 %), battery voltage (u16, mV), battery level (u8, %).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XiaomiRecord {
    /// UNIX time the measurement was taken, 0 if unknown.
    pub time: u32,
    /// Signal strength, dBm.
    pub rssi: i8,
    /// Temperature, 1e-2 °C.
    pub temperature: i16,
    /// Humidity, 1e-2 %.
    pub humidity: u16,
    /// Battery voltage, mV.
    pub battery_mv: u16,
    /// Battery level, %. Zero means not measured.
    pub battery_level: u8,
}

impl XiaomiRecord {
    /// Encodes the record.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0..4].copy_from_slice(&self.time.to_le_bytes());
        buf[4..5].copy_from_slice(&self.rssi.to_le_bytes());
        buf[5..7].copy_from_slice(&self.temperature.to_le_bytes());
        buf[7..9].copy_from_slice(&self.humidity.to_le_bytes());
        buf[9..11].copy_from_slice(&self.battery_mv.to_le_bytes());
        buf[11] = self.battery_level;
        buf
    }

    /// Decodes a record. Returns `None` if `bytes` is not [`RECORD_SIZE`] long.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let b: &[u8; RECORD_SIZE] = bytes.try_into().ok()?;
        Some(Self {
            time: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            rssi: i8::from_le_bytes([b[4]]),
            temperature: i16::from_le_bytes([b[5], b[6]]),
            humidity: u16::from_le_bytes([b[7], b[8]]),
            battery_mv: u16::from_le_bytes([b[9], b[10]]),
            battery_level: b[11],
        })
    }
}

/// Decoded Xiaomi measurements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XiaomiDataset {
    /// Signal strength.
    pub rssi: Rssi,
    /// Relative humidity.
    pub humidity: Humidity,
    /// Temperature.
    pub temperature: Temperature,
    /// Battery state.
    pub battery: BatteryLevel,
}

const XIAOMI_DESCR: &[DataDescr] = &[
    DataDescr::new(DataType::Rssi, Assignment::Unassigned),
    DataDescr::new(DataType::Humidity, Assignment::BoardHumidity),
    DataDescr::new(DataType::Temperature, Assignment::BoardTemperature),
    DataDescr::new(DataType::BatteryLevel, Assignment::Unassigned),
];

impl Dataset for XiaomiDataset {
    fn descriptors(&self) -> &'static [DataDescr] {
        XIAOMI_DESCR
    }

    fn value(&self, index: usize) -> Option<DataValue> {
        match index {
            0 => Some(DataValue::Rssi(self.rssi)),
            1 => Some(DataValue::Humidity(self.humidity)),
            2 => Some(DataValue::Temperature(self.temperature)),
            3 if self.battery.level > 0 => Some(DataValue::BatteryLevel(self.battery)),
            _ => None,
        }
    }
}

fn ingest(payload: &Payload<'_>) -> Result<Decoded, IngestError> {
    let record = XiaomiRecord::from_bytes(payload.bytes)
        .ok_or_else(|| IngestError::Decode("truncated xiaomi record".into()))?;

    let mut decoded = Decoded::new(XiaomiDataset {
        rssi: Rssi { value: record.rssi },
        humidity: Humidity {
            value: record.humidity,
            sensor: SensorType::Embedded,
        },
        temperature: Temperature {
            value: record.temperature,
            sensor: SensorType::Embedded,
        },
        battery: BatteryLevel {
            level: record.battery_level,
            voltage_mv: record.battery_mv,
        },
    });
    if record.time != 0 {
        decoded.timestamp = Some(record.time);
    }
    Ok(decoded)
}

static ENDPOINT: EndpointConfig = EndpointConfig {
    id: EndpointId::XiaomiMijia,
    expected_payload_size: RECORD_SIZE,
    data_size: size_of::<XiaomiDataset>(),
    ingest,
    command: None,
    data_descr: XIAOMI_DESCR,
    cmd_descr: &[],
    retain_last_event: true,
};

/// Capability table of Xiaomi thermometers.
#[derive(Debug, Default)]
pub struct XiaomiApi;

impl DeviceApi for XiaomiApi {
    fn init_endpoints(&self, _addr: &DeviceAddr) -> Result<Vec<&'static EndpointConfig>, String> {
        Ok(vec![&ENDPOINT])
    }
}

/// Feeds a thermometer record into the hub.
///
/// Returns the number of subscriptions the resulting event was queued to.
///
/// # Errors
///
/// Returns an error if the device cannot be registered or the record cannot
/// be ingested.
pub fn register_xiaomi_record(
    hub: &Hub,
    addr: BleAddr,
    record: &XiaomiRecord,
) -> crate::Result<usize> {
    hub.register_data(
        &DeviceAddr::ble(DeviceType::XiaomiMijia, addr),
        &record.to_bytes(),
        record.time,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> XiaomiRecord {
        XiaomiRecord {
            time: 1_700_000_123,
            rssi: -72,
            temperature: 2_134,
            humidity: 4_567,
            battery_mv: 2_950,
            battery_level: 87,
        }
    }

    #[test]
    fn decode_record() {
        let bytes = record().to_bytes();
        let decoded = ingest(&Payload::new(&bytes, 0)).unwrap();
        assert_eq!(decoded.timestamp, Some(1_700_000_123));

        let data = decoded.data.downcast_ref::<XiaomiDataset>().unwrap();
        assert_eq!(data.temperature.value, 2_134);
        assert_eq!(data.humidity.value, 4_567);
        assert_eq!(data.rssi.value, -72);
        assert_eq!(data.battery.voltage_mv, 2_950);
    }

    #[test]
    fn battery_hidden_when_not_measured() {
        let mut rec = record();
        rec.battery_level = 0;
        let bytes = rec.to_bytes();
        let decoded = ingest(&Payload::new(&bytes, 0)).unwrap();
        assert!(decoded.data.get(DataType::BatteryLevel, 0).is_none());
        assert_eq!(decoded.data.fields().len(), 3);
    }

    #[test]
    fn zero_time_keeps_payload_timestamp() {
        let mut rec = record();
        rec.time = 0;
        let bytes = rec.to_bytes();
        assert_eq!(ingest(&Payload::new(&bytes, 0)).unwrap().timestamp, None);
    }

    #[test]
    fn truncated_record_is_rejected() {
        assert!(matches!(
            ingest(&Payload::new(&[0; 5], 0)),
            Err(IngestError::Decode(_))
        ));
    }
}
