// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Subscription configuration.

use std::fmt;
use std::sync::Arc;

use crate::device::{DeviceAddr, DeviceType, MacAddr};
use crate::error::SubscriptionError;
use crate::event::{Event, EventKind};

/// Custom event predicate.
///
/// Called outside of any dispatcher lock, possibly from several producers at
/// once. Implemented for every `Fn(&Event) -> bool` closure.
pub trait EventFilter: Send + Sync {
    /// Returns true to queue `event`.
    fn accept(&self, event: &Event) -> bool;
}

impl<F> EventFilter for F
where
    F: Fn(&Event) -> bool + Send + Sync,
{
    fn accept(&self, event: &Event) -> bool {
        self(event)
    }
}

/// Hook run after an event has been queued to a subscription.
pub type QueuedHook = Arc<dyn Fn(&Event) + Send + Sync>;

/// Immutable filter configuration of a subscription.
///
/// Every criterion is optional; a default configuration matches every event.
/// Criteria are evaluated in order: device type, device address, event kind,
/// custom filter.
///
/// # Examples
///
/// ```
/// use ha_hub::device::DeviceType;
/// use ha_hub::event::EventKind;
/// use ha_hub::subscription::SubscriptionConf;
///
/// let conf = SubscriptionConf::new()
///     .with_device_type(DeviceType::XiaomiMijia)
///     .with_event_kind(EventKind::Data)
///     .with_filter(|event: &ha_hub::event::Event| event.timestamp() > 0);
/// assert!(conf.validate().is_ok());
/// ```
#[derive(Clone, Default)]
pub struct SubscriptionConf {
    device_type: Option<DeviceType>,
    device_addr: Option<MacAddr>,
    event_kind: Option<EventKind>,
    filter: Option<Arc<dyn EventFilter>>,
    on_queued: Option<QueuedHook>,
}

impl SubscriptionConf {
    /// Creates a configuration matching every event.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Only match events of devices of this type.
    #[must_use]
    pub fn with_device_type(mut self, device_type: DeviceType) -> Self {
        self.device_type = Some(device_type);
        self
    }

    /// Only match events of the device at this address.
    ///
    /// Requires a device type, see [`validate`](Self::validate).
    #[must_use]
    pub fn with_device_addr(mut self, mac: MacAddr) -> Self {
        self.device_addr = Some(mac);
        self
    }

    /// Only match events of this kind.
    #[must_use]
    pub fn with_event_kind(mut self, kind: EventKind) -> Self {
        self.event_kind = Some(kind);
        self
    }

    /// Only match events accepted by `filter`.
    #[must_use]
    pub fn with_filter(mut self, filter: impl EventFilter + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Runs `hook` after each event is queued.
    #[must_use]
    pub fn with_on_queued(mut self, hook: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.on_queued = Some(Arc::new(hook));
        self
    }

    /// Returns true if a custom filter is set.
    #[must_use]
    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    pub(crate) fn set_filter(&mut self, filter: Arc<dyn EventFilter>) {
        self.filter = Some(filter);
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::InvalidConfig`] when an address filter is
    /// set without a device type.
    pub fn validate(&self) -> Result<(), SubscriptionError> {
        if self.device_addr.is_some() && matches!(self.device_type, None | Some(DeviceType::None)) {
            return Err(SubscriptionError::InvalidConfig(
                "device address filter requires a device type",
            ));
        }
        Ok(())
    }

    /// Returns true if `event` passes every criterion.
    pub(crate) fn matches(&self, event: &Event) -> bool {
        let addr = event.addr();
        if let Some(device_type) = self.device_type
            && addr.device_type != device_type
        {
            return false;
        }
        if let (Some(mac), Some(device_type)) = (self.device_addr, self.device_type)
            && !DeviceAddr::new(device_type, mac).same_device(addr)
        {
            return false;
        }
        if let Some(kind) = self.event_kind
            && event.kind() != kind
        {
            return false;
        }
        self.filter.as_ref().is_none_or(|f| f.accept(event))
    }

    pub(crate) fn on_queued(&self) -> Option<&QueuedHook> {
        self.on_queued.as_ref()
    }
}

impl fmt::Debug for SubscriptionConf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionConf")
            .field("device_type", &self.device_type)
            .field("device_addr", &self.device_addr)
            .field("event_kind", &self.event_kind)
            .field("filter", &self.filter.is_some())
            .field("on_queued", &self.on_queued.is_some())
            .finish()
    }
}
