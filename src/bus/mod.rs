// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Field-bus query multiplexer.
//!
//! - [`BusFrame`] / [`RawFrame`] - Decoded and on-the-wire frames
//! - [`BusProtocol`] - The protocol state machine driven by the worker
//! - [`CaniotProtocol`] - Controller side of the field-bus protocol
//! - [`BusController`] - Caller handle: `query()`, `send()`, inbound frames

mod controller;
mod frame;
mod protocol;

pub use controller::{BusController, QueryReply, QueryStatus};
pub use frame::{BusEndpoint, BusFrame, Direction, FrameType, MAX_PAYLOAD, RawFrame};
pub use protocol::{
    BusProtocol, CaniotProtocol, CompletionStatus, EINVAL, ENOBUFS, ProtocolEvent, QueryHandle,
};
