// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Field-bus frames.
//!
//! The 11-bit CAN identifier of a field-bus frame packs, from the least
//! significant bit:
//!
//! | bits  | field |
//! |-------|-------|
//! | 0..2  | frame type |
//! | 2     | direction, 0 = query, 1 = response |
//! | 3..9  | device id (class, sub-id) |
//! | 9..11 | endpoint |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::device::BusDeviceId;

/// Maximum payload of a frame.
pub const MAX_PAYLOAD: usize = 8;

/// A frame as seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RawFrame {
    /// Standard CAN identifier.
    pub id: u16,
    /// Payload, at most [`MAX_PAYLOAD`] bytes.
    pub data: Vec<u8>,
}

/// Frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    /// Command query, or error response.
    Command = 0,
    /// Telemetry query or response.
    Telemetry = 1,
    /// Attribute write query, or attribute error response.
    WriteAttribute = 2,
    /// Attribute read query or response.
    ReadAttribute = 3,
}

impl FrameType {
    const fn from_bits(bits: u16) -> Self {
        match bits & 0x3 {
            0 => Self::Command,
            1 => Self::Telemetry,
            2 => Self::WriteAttribute,
            _ => Self::ReadAttribute,
        }
    }
}

/// Frame direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Controller to device.
    Query,
    /// Device to controller.
    Response,
}

/// Device endpoint addressed by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusEndpoint {
    /// First application endpoint.
    App0 = 0,
    /// Second application endpoint.
    App1 = 1,
    /// Third application endpoint.
    App2 = 2,
    /// Board-level control.
    BoardControl = 3,
}

impl BusEndpoint {
    const fn from_bits(bits: u16) -> Self {
        match bits & 0x3 {
            0 => Self::App0,
            1 => Self::App1,
            2 => Self::App2,
            _ => Self::BoardControl,
        }
    }
}

/// A decoded field-bus frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BusFrame {
    /// Frame type.
    pub frame_type: FrameType,
    /// Direction.
    pub direction: Direction,
    /// Device the frame comes from or goes to.
    pub did: BusDeviceId,
    /// Addressed endpoint.
    pub endpoint: BusEndpoint,
    /// Payload, at most [`MAX_PAYLOAD`] bytes.
    pub payload: Vec<u8>,
}

impl BusFrame {
    /// Telemetry query for `endpoint` of `did`.
    #[must_use]
    pub fn telemetry_query(did: BusDeviceId, endpoint: BusEndpoint) -> Self {
        Self {
            frame_type: FrameType::Telemetry,
            direction: Direction::Query,
            did,
            endpoint,
            payload: Vec::new(),
        }
    }

    /// Command query carrying `payload`.
    #[must_use]
    pub fn command(did: BusDeviceId, endpoint: BusEndpoint, payload: Vec<u8>) -> Self {
        Self {
            frame_type: FrameType::Command,
            direction: Direction::Query,
            did,
            endpoint,
            payload,
        }
    }

    /// Returns true for responses.
    #[must_use]
    pub fn is_response(&self) -> bool {
        self.direction == Direction::Response
    }

    /// Returns true for error responses.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.is_response()
            && matches!(self.frame_type, FrameType::Command | FrameType::WriteAttribute)
    }

    /// Returns true if this frame is a response to `query`.
    ///
    /// Command and telemetry queries are answered with telemetry, or with a
    /// command error. Attribute queries are answered with an attribute read,
    /// or with an attribute write error.
    #[must_use]
    pub fn answers(&self, query: &BusFrame) -> bool {
        let expected = match query.frame_type {
            FrameType::Command | FrameType::Telemetry => [FrameType::Telemetry, FrameType::Command],
            FrameType::WriteAttribute | FrameType::ReadAttribute => {
                [FrameType::ReadAttribute, FrameType::WriteAttribute]
            }
        };
        self.is_response()
            && self.did == query.did
            && self.endpoint == query.endpoint
            && expected.contains(&self.frame_type)
    }

    /// Returns true for board-level telemetry responses.
    #[must_use]
    pub fn is_board_telemetry(&self) -> bool {
        self.is_response()
            && self.frame_type == FrameType::Telemetry
            && self.endpoint == BusEndpoint::BoardControl
    }

    /// Returns the CAN identifier.
    #[must_use]
    pub fn can_id(&self) -> u16 {
        let direction = u16::from(self.direction == Direction::Response);
        (self.frame_type as u16)
            | (direction << 2)
            | (u16::from(self.did.raw()) << 3)
            | ((self.endpoint as u16) << 9)
    }

    /// Encodes the frame. The payload is truncated to [`MAX_PAYLOAD`].
    #[must_use]
    pub fn to_raw(&self) -> RawFrame {
        let len = self.payload.len().min(MAX_PAYLOAD);
        RawFrame {
            id: self.can_id(),
            data: self.payload[..len].to_vec(),
        }
    }

    /// Decodes a frame. Returns `None` for identifiers above 11 bits or
    /// oversized payloads.
    #[must_use]
    pub fn from_raw(raw: &RawFrame) -> Option<Self> {
        if raw.id > 0x7FF || raw.data.len() > MAX_PAYLOAD {
            return None;
        }
        let direction = if raw.id & 0x4 == 0 {
            Direction::Query
        } else {
            Direction::Response
        };
        let did = u8::try_from((raw.id >> 3) & 0x3F).ok()?;
        Some(Self {
            frame_type: FrameType::from_bits(raw.id),
            direction,
            did: BusDeviceId::from_raw(did),
            endpoint: BusEndpoint::from_bits(raw.id >> 9),
            payload: raw.data.clone(),
        })
    }
}

impl fmt::Display for BusFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {:?} {} ep {:?} [",
            self.frame_type, self.direction, self.did, self.endpoint
        )?;
        for (i, byte) in self.payload.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02x}")?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_layout() {
        let did = BusDeviceId::new(1, 2).unwrap();
        let frame = BusFrame::telemetry_query(did, BusEndpoint::BoardControl);
        // type 1 | query | did 0x0a << 3 | endpoint 3 << 9
        assert_eq!(frame.can_id(), 1 | (0x0a << 3) | (3 << 9));

        let decoded = BusFrame::from_raw(&frame.to_raw()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn response_kinds() {
        let did = BusDeviceId::new(0, 1).unwrap();
        let mut frame = BusFrame::telemetry_query(did, BusEndpoint::BoardControl);
        assert!(!frame.is_board_telemetry());

        frame.direction = Direction::Response;
        assert!(frame.is_board_telemetry());
        assert!(!frame.is_error());

        frame.frame_type = FrameType::Command;
        assert!(frame.is_error());
    }

    #[test]
    fn oversized_frames_are_rejected() {
        assert!(BusFrame::from_raw(&RawFrame { id: 0x800, data: vec![] }).is_none());
        assert!(
            BusFrame::from_raw(&RawFrame {
                id: 0x10,
                data: vec![0; 9]
            })
            .is_none()
        );
    }

    #[test]
    fn display_lists_payload() {
        let did = BusDeviceId::new(0, 1).unwrap();
        let frame = BusFrame::command(did, BusEndpoint::App0, vec![0x01, 0xff]);
        assert!(frame.to_string().ends_with("[01 ff]"));
    }
}
