// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The gateway board itself: die temperature.

use crate::data::{Assignment, DataDescr, DataType, DataValue, Dataset, SensorType, Temperature};
use crate::device::{Decoded, DeviceAddr, DeviceApi, DeviceType, EndpointConfig, EndpointId, Payload};
use crate::error::IngestError;
use crate::hub::Hub;

/// Die temperature of the gateway microcontroller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DieTemperature {
    /// Temperature, 1e-2 °C.
    pub temperature: Temperature,
}

const DIE_DESCR: &[DataDescr] = &[DataDescr::new(
    DataType::Temperature,
    Assignment::SocTemperature,
)];

impl Dataset for DieTemperature {
    fn descriptors(&self) -> &'static [DataDescr] {
        DIE_DESCR
    }

    fn value(&self, index: usize) -> Option<DataValue> {
        (index == 0).then_some(DataValue::Temperature(self.temperature))
    }
}

#[allow(clippy::cast_possible_truncation)]
fn ingest(payload: &Payload<'_>) -> Result<Decoded, IngestError> {
    let bytes: [u8; 4] = payload
        .bytes
        .try_into()
        .map_err(|_| IngestError::Decode("die temperature is 4 bytes".into()))?;
    let celsius = f32::from_le_bytes(bytes);
    if !celsius.is_finite() {
        return Err(IngestError::Decode(format!("invalid die temperature {celsius}")));
    }

    // Saturating float-to-int conversion.
    let value = (celsius * 100.0) as i16;
    Ok(Decoded::new(DieTemperature {
        temperature: Temperature {
            value,
            sensor: SensorType::Embedded,
        },
    }))
}

static ENDPOINT: EndpointConfig = EndpointConfig {
    id: EndpointId::NucleoF429zi,
    expected_payload_size: size_of::<f32>(),
    data_size: size_of::<DieTemperature>(),
    ingest,
    command: None,
    data_descr: DIE_DESCR,
    cmd_descr: &[],
    retain_last_event: true,
};

/// Capability table of the gateway board.
#[derive(Debug, Default)]
pub struct NucleoApi;

impl DeviceApi for NucleoApi {
    fn init_endpoints(&self, _addr: &DeviceAddr) -> Result<Vec<&'static EndpointConfig>, String> {
        Ok(vec![&ENDPOINT])
    }
}

/// Feeds a die temperature reading into the hub.
///
/// # Errors
///
/// Returns an error if the reading cannot be ingested.
pub fn register_die_temperature(hub: &Hub, timestamp: u32, celsius: f32) -> crate::Result<usize> {
    hub.register_data(
        &DeviceAddr::local(DeviceType::NucleoF429zi),
        &celsius.to_le_bytes(),
        timestamp,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_die_temperature() {
        let bytes = 41.25f32.to_le_bytes();
        let decoded = ingest(&Payload::new(&bytes, 0)).unwrap();
        let die = decoded.data.downcast_ref::<DieTemperature>().unwrap();
        assert_eq!(die.temperature.value, 4_125);
    }

    #[test]
    fn nan_is_rejected() {
        let bytes = f32::NAN.to_le_bytes();
        assert!(ingest(&Payload::new(&bytes, 0)).is_err());
    }
}
