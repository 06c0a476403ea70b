// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Publish/subscribe for hub events.
//!
//! # Overview
//!
//! - [`SubscriptionConf`] - Immutable filter configuration
//! - [`Dispatcher`] - Fans every produced event out to matching subscriptions
//! - [`Subscription`] - Handle to a FIFO queue of matching events
//! - [`ExtendedFilter`] - Stateful per-device filters (dedup, count, interval, subsampling)
//!
//! # Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use ha_hub::{Hub, HubConfig};
//! use ha_hub::event::EventKind;
//! use ha_hub::subscription::SubscriptionConf;
//!
//! # async fn example() -> ha_hub::Result<()> {
//! let hub = Hub::new(HubConfig::default())?;
//! let sub = hub.subscribe(SubscriptionConf::new().with_event_kind(EventKind::Data))?;
//!
//! while let Some(event) = sub.wait(Some(Duration::from_secs(5))).await {
//!     println!("{} at {}", event.addr(), event.timestamp());
//! }
//! # Ok(())
//! # }
//! ```

mod conf;
mod dispatcher;
mod extended;

pub use conf::{EventFilter, QueuedHook, SubscriptionConf};
pub use dispatcher::{Dispatcher, Subscription};
pub use extended::{EntryState, ExtendedFilter, FilterMode, LookupEntry, LookupKind};
