// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Decoded data model.
//!
//! Each endpoint decodes its raw payload into a concrete dataset type
//! (for example [`XiaomiDataset`](crate::catalog::XiaomiDataset)). Consumers
//! that know the device type downcast with [`Event::data`](crate::event::Event::data);
//! generic consumers walk the dataset through its descriptor table with
//! [`Dataset::fields`] and [`Dataset::get`].

use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of a decoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// [`Temperature`].
    Temperature,
    /// [`Humidity`].
    Humidity,
    /// [`BatteryLevel`].
    BatteryLevel,
    /// [`Rssi`].
    Rssi,
    /// Mixed digital inputs and outputs.
    DigitalInOut,
    /// Digital inputs.
    DigitalIn,
    /// Digital outputs.
    DigitalOut,
    /// [`Analog`].
    Analog,
}

impl DataType {
    /// Returns a bit unique to this type, for type masks.
    #[must_use]
    pub const fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

/// What a value measures or drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assignment {
    /// Not assigned.
    #[default]
    Unassigned,
    /// Microcontroller die temperature.
    SocTemperature,
    /// On-board temperature sensor.
    BoardTemperature,
    /// External temperature probe.
    ExternalTemperature,
    /// On-board humidity sensor.
    BoardHumidity,
    /// External humidity probe.
    ExternalHumidity,
    /// Open-collector outputs.
    OpenCollector,
    /// Relays.
    Relay,
    /// General purpose digital I/O.
    DigitalIo,
}

/// Physical location of a sensor on its device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    /// Unknown.
    #[default]
    None,
    /// Embedded in the device.
    Embedded,
    /// First external probe.
    External1,
    /// Second external probe.
    External2,
    /// Third external probe.
    External3,
}

/// Temperature in hundredths of a degree Celsius.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Temperature {
    /// Value, 1e-2 °C.
    pub value: i16,
    /// Sensor location.
    pub sensor: SensorType,
}

impl Temperature {
    /// Returns the temperature in degrees Celsius.
    #[must_use]
    pub fn celsius(&self) -> f32 {
        f32::from(self.value) / 100.0
    }
}

/// Relative humidity in hundredths of a percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Humidity {
    /// Value, 1e-2 %.
    pub value: u16,
    /// Sensor location.
    pub sensor: SensorType,
}

/// Battery state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatteryLevel {
    /// Charge level in percent. Zero means not measured.
    pub level: u8,
    /// Voltage in millivolts.
    pub voltage_mv: u16,
}

/// Received signal strength in dBm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rssi {
    /// Value, dBm.
    pub value: i8,
}

/// Digital pin states, one bit per pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Digital {
    /// Pin levels.
    pub value: u32,
    /// Pins that are meaningful.
    pub mask: u32,
}

impl Digital {
    /// Returns the level of `pin`, or `None` if the pin is masked out.
    #[must_use]
    pub fn pin(&self, pin: u8) -> Option<bool> {
        let bit = 1u32.checked_shl(u32::from(pin))?;
        (self.mask & bit != 0).then_some(self.value & bit != 0)
    }
}

/// Analog reading in microvolts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Analog {
    /// Value, 1e-6 V.
    pub value_uv: u32,
}

/// A single decoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DataValue {
    /// Temperature reading.
    Temperature(Temperature),
    /// Humidity reading.
    Humidity(Humidity),
    /// Battery reading.
    BatteryLevel(BatteryLevel),
    /// Signal strength.
    Rssi(Rssi),
    /// Digital pin states; the tag tells inputs from outputs.
    Digital(DataType, Digital),
    /// Analog reading.
    Analog(Analog),
}

impl DataValue {
    /// Returns the kind of this value.
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        match self {
            Self::Temperature(_) => DataType::Temperature,
            Self::Humidity(_) => DataType::Humidity,
            Self::BatteryLevel(_) => DataType::BatteryLevel,
            Self::Rssi(_) => DataType::Rssi,
            Self::Digital(kind, _) => *kind,
            Self::Analog(_) => DataType::Analog,
        }
    }
}

/// Describes one field of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescr {
    /// Optional field name.
    pub name: Option<&'static str>,
    /// Kind of the field.
    pub data_type: DataType,
    /// What the field measures.
    pub assignment: Assignment,
}

impl DataDescr {
    /// Unnamed descriptor.
    #[must_use]
    pub const fn new(data_type: DataType, assignment: Assignment) -> Self {
        Self {
            name: None,
            data_type,
            assignment,
        }
    }

    /// Named descriptor.
    #[must_use]
    pub const fn named(name: &'static str, data_type: DataType, assignment: Assignment) -> Self {
        Self {
            name: Some(name),
            data_type,
            assignment,
        }
    }
}

/// Returns true if any descriptor in `descr` has the given type.
#[must_use]
pub fn descr_has_type(descr: &[DataDescr], data_type: DataType) -> bool {
    descr.iter().any(|d| d.data_type == data_type)
}

/// Returns the mask of every type present in `descr`.
#[must_use]
pub fn descr_types_mask(descr: &[DataDescr]) -> u32 {
    descr.iter().fold(0, |mask, d| mask | d.data_type.bit())
}

/// A descriptor paired with its current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataField {
    /// The field descriptor.
    pub descr: DataDescr,
    /// The field value.
    pub value: DataValue,
}

/// A decoded payload.
///
/// Implementors expose their descriptor table and the value at each index,
/// in the same order.
pub trait Dataset: Any + Send + Sync + fmt::Debug {
    /// Returns the descriptor table.
    fn descriptors(&self) -> &'static [DataDescr];

    /// Returns the value of field `index`, or `None` when out of range or not
    /// measured.
    fn value(&self, index: usize) -> Option<DataValue>;

    /// Returns every measured field with its descriptor.
    fn fields(&self) -> Vec<DataField> {
        self.descriptors()
            .iter()
            .enumerate()
            .filter_map(|(index, descr)| {
                self.value(index).map(|value| DataField {
                    descr: *descr,
                    value,
                })
            })
            .collect()
    }

    /// Returns the `occurrence`-th value of type `data_type`.
    fn get(&self, data_type: DataType, occurrence: usize) -> Option<DataValue> {
        self.descriptors()
            .iter()
            .enumerate()
            .filter(|(_, d)| d.data_type == data_type)
            .nth(occurrence)
            .and_then(|(index, _)| self.value(index))
    }
}

impl dyn Dataset {
    /// Downcasts to a concrete dataset type.
    #[must_use]
    pub fn downcast_ref<T: Dataset>(&self) -> Option<&T> {
        let any: &dyn Any = self;
        any.downcast_ref()
    }
}

/// A loosely-typed data item attached to an event besides its dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxData {
    /// What the value measures.
    pub assignment: Assignment,
    /// The value.
    pub value: DataValue,
}
