// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Built-in device capability tables.
//!
//! | Device type | Medium | Endpoint | Payload |
//! |-------------|--------|----------|---------|
//! | [`XiaomiMijia`](crate::device::DeviceType::XiaomiMijia) | BLE | `XiaomiMijia` | 12-byte [`XiaomiRecord`] |
//! | [`Caniot`](crate::device::DeviceType::Caniot) | CAN | `CaniotBlc(class)` | 8-byte [`BoardTelemetry`] |
//! | [`NucleoF429zi`](crate::device::DeviceType::NucleoF429zi) | none | `NucleoF429zi` | `f32` die temperature |

mod caniot;
mod nucleo;
mod xiaomi;

use std::collections::HashMap;
use std::sync::Arc;

pub use caniot::{
    BoardTelemetry, CaniotApi, OutputCommand, TELEMETRY_SIZE, centi_to_t10, encode_outputs,
    register_bus_telemetry, t10_to_centi,
};
pub use nucleo::{DieTemperature, NucleoApi, register_die_temperature};
pub use xiaomi::{RECORD_SIZE, XiaomiApi, XiaomiDataset, XiaomiRecord, register_xiaomi_record};

use crate::device::{DeviceApi, DeviceType};

/// Returns the capability tables of every built-in device type.
#[must_use]
pub fn builtin_apis() -> HashMap<DeviceType, Arc<dyn DeviceApi>> {
    let mut apis: HashMap<DeviceType, Arc<dyn DeviceApi>> = HashMap::new();
    apis.insert(DeviceType::XiaomiMijia, Arc::new(XiaomiApi));
    apis.insert(DeviceType::Caniot, Arc::new(CaniotApi));
    apis.insert(DeviceType::NucleoF429zi, Arc::new(NucleoApi));
    apis
}
