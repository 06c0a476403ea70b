// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reference-counted events.
//!
//! An [`Event`] is created by ingesting a payload (or by a command), shared
//! with every subscriber whose filter matches it, and optionally retained by
//! its endpoint as the device's last known data. Every holder owns a handle;
//! the event is destroyed when the last handle is dropped.

mod alloc;
mod model;

pub use alloc::EventAlloc;
pub(crate) use alloc::{Ingested, ingest};
pub use model::{Event, EventBuilder, EventKind};
