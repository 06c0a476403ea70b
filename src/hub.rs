// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The hub: registry, event pools and dispatcher behind one handle.

use std::collections::HashMap;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use crate::catalog::builtin_apis;
use crate::clock::Clock;
use crate::config::HubConfig;
use crate::data::{Assignment, AuxData, DataValue};
use crate::device::{
    Device, DeviceAddr, DeviceApi, DeviceFilter, DeviceType, IterOptions, Payload, PinnedEvents,
    Registry, RoomTable,
};
use crate::error::{IngestError, RegistryError, Result};
use crate::event::{EventAlloc, EventBuilder, EventKind, Ingested, ingest};
use crate::stats::{HubStats, MemoryPools, StatsSnapshot};
use crate::subscription::{Dispatcher, Subscription, SubscriptionConf};

struct HubInner {
    config: HubConfig,
    registry: Registry,
    events: EventAlloc,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<HubStats>,
    clock: Clock,
}

/// Device and event hub.
///
/// Cheap to clone: every clone shares the same registry, pools and
/// subscriptions. All methods may be called concurrently from any thread.
///
/// # Examples
///
/// ```
/// use ha_hub::{Hub, HubConfig};
/// use ha_hub::catalog::{XiaomiRecord, register_xiaomi_record};
/// use ha_hub::device::BleAddr;
/// use ha_hub::subscription::SubscriptionConf;
///
/// let hub = Hub::new(HubConfig::default())?;
/// let sub = hub.subscribe(SubscriptionConf::new())?;
///
/// let record = XiaomiRecord { time: 1_700_000_000, temperature: 2_150, ..Default::default() };
/// let matched = register_xiaomi_record(&hub, BleAddr::new([0xA4, 0xC1, 0x38, 0, 0, 1]), &record)?;
/// assert_eq!(matched, 1);
///
/// let event = sub.try_next().unwrap();
/// assert_eq!(event.timestamp(), 1_700_000_000);
/// # Ok::<(), ha_hub::Error>(())
/// ```
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Creates a hub with the built-in device types and the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if `config` does not
    /// validate.
    pub fn new(config: HubConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Starts building a hub with a custom clock or extra device types.
    #[must_use]
    pub fn builder(config: HubConfig) -> HubBuilder {
        HubBuilder::new(config)
    }

    /// Returns the configuration the hub was built with.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Returns the device registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Returns the event allocator.
    #[must_use]
    pub fn events(&self) -> &EventAlloc {
        &self.inner.events
    }

    /// Returns the dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    /// Returns the clock.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.inner.clock
    }

    /// Returns the device at `addr` without registering it.
    #[must_use]
    pub fn get_device(&self, addr: &DeviceAddr) -> Option<Arc<Device>> {
        self.inner.registry.get(addr)
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Feeds a raw payload received from the device at `addr`.
    ///
    /// Registers the device on first sight, decodes the payload into a data
    /// event, retains it on its endpoint when the endpoint asks for it and
    /// dispatches it. A zero `timestamp` means now.
    ///
    /// Returns the number of subscriptions the event was queued to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Registry`](crate::Error::Registry) when the device
    /// cannot be registered and [`Error::Ingest`](crate::Error::Ingest) when
    /// the payload is dropped. Both are also counted in [`stats`](Self::stats).
    pub fn register_data(&self, addr: &DeviceAddr, payload: &[u8], timestamp: u32) -> Result<usize> {
        let inner = &*self.inner;
        let device = inner.registry.register(addr)?;

        let Ingested { event, endpoint } = ingest(
            &inner.events,
            &device,
            &Payload::new(payload, timestamp),
            inner.clock.now(),
        )
        .inspect_err(|e| self.count_failure(&device, e, false))?;

        device.record_rx(payload.len());

        let retained = device.endpoint(endpoint).is_some_and(|ep| ep.retain_last_event);
        if retained {
            // Previous holder released here, outside the device lock.
            drop(device.replace_last_event(endpoint, Some(event.clone())));
        }

        let matched = inner.dispatcher.notify(&event);
        inner.stats.record_event();
        if matched == 0 && !retained {
            inner.stats.record_never_referenced();
        }

        tracing::debug!(
            sdevuid = %device.sdevuid(),
            addr = %addr,
            endpoint,
            timestamp = event.timestamp(),
            matched,
            "Data event dispatched"
        );
        Ok(matched)
    }

    /// Sends `value` to endpoint `endpoint` of the device at `addr`.
    ///
    /// The endpoint's command function encodes the value into the frame
    /// returned to the caller, who is responsible for transmitting it. A
    /// command event carrying the value is dispatched on success, an error
    /// event carrying the failure otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DeviceNotFound`] for an unknown device and
    /// an [`IngestError`] when the endpoint does not exist, takes no
    /// commands or refuses the value.
    pub fn command(&self, addr: &DeviceAddr, endpoint: usize, value: &DataValue) -> Result<Vec<u8>> {
        let device = self
            .inner
            .registry
            .get(addr)
            .ok_or(RegistryError::DeviceNotFound)?;

        match encode_command(&device, endpoint, value) {
            Ok((frame, assignment)) => {
                device.record_tx(frame.len());
                self.emit_command(&device, endpoint, EventKind::Command, |mut b| {
                    b.push_aux(AuxData {
                        assignment,
                        value: *value,
                    });
                    b
                });
                tracing::debug!(sdevuid = %device.sdevuid(), endpoint, len = frame.len(), "Command encoded");
                Ok(frame)
            }
            Err(e) => {
                self.count_failure(&device, &e, true);
                let carried = e.clone();
                self.emit_command(&device, endpoint, EventKind::Error, |b| b.error(carried));
                Err(e.into())
            }
        }
    }

    fn emit_command(
        &self,
        device: &Arc<Device>,
        endpoint: usize,
        kind: EventKind,
        fill: impl FnOnce(EventBuilder) -> EventBuilder,
    ) {
        let inner = &*self.inner;
        let builder = match inner.events.alloc(kind) {
            Ok(builder) => builder
                .device(device, endpoint)
                .timestamp(inner.clock.now()),
            Err(e) => {
                inner
                    .stats
                    .record_ingest_failure(&IngestError::from(e), true);
                tracing::warn!(sdevuid = %device.sdevuid(), kind = %kind, "No event slot for command");
                return;
            }
        };
        let event = fill(builder).freeze();

        let matched = inner.dispatcher.notify(&event);
        inner.stats.record_event();
        if matched == 0 {
            inner.stats.record_never_referenced();
        }
    }

    fn count_failure(&self, device: &Device, err: &IngestError, command: bool) {
        device.record_error(err);
        self.inner.stats.record_ingest_failure(err, command);
        match err {
            IngestError::PoolExhausted | IngestError::NoMemory(_) => {
                tracing::warn!(sdevuid = %device.sdevuid(), error = %err, "Event dropped");
            }
            _ => tracing::debug!(sdevuid = %device.sdevuid(), error = %err, "Event dropped"),
        }
    }

    // ========================================================================
    // Consumers
    // ========================================================================

    /// Subscribes to events matching `conf`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Subscription`](crate::Error::Subscription) when the
    /// configuration is invalid or the subscription pool is full.
    pub fn subscribe(&self, conf: SubscriptionConf) -> Result<Subscription> {
        Ok(self.inner.dispatcher.subscribe(conf)?)
    }

    /// Walks the registered devices, see [`Registry::iterate`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Registry`](crate::Error::Registry) when the index
    /// range is empty.
    pub fn iterate<F>(&self, filter: &DeviceFilter, options: IterOptions, callback: F) -> Result<usize>
    where
        F: FnMut(&Arc<Device>, &PinnedEvents) -> ControlFlow<()>,
    {
        Ok(self.inner.registry.iterate(filter, options, callback)?)
    }

    /// Returns the counters and pool occupancy.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        let inner = &*self.inner;
        inner.stats.snapshot(&MemoryPools {
            events: inner.events.pool(),
            subscriptions: inner.dispatcher.pool(),
            data: inner.events.budget(),
            devices: inner.registry.len(),
            device_capacity: inner.registry.capacity(),
        })
    }
}

/// Runs the command function of endpoint `endpoint`.
fn encode_command(
    device: &Device,
    endpoint: usize,
    value: &DataValue,
) -> std::result::Result<(Vec<u8>, Assignment), IngestError> {
    let config = device
        .endpoint(endpoint)
        .ok_or(IngestError::InvalidEndpoint(endpoint))?;
    let command = config
        .command
        .ok_or(IngestError::NoCommandHandler(config.id))?;
    let frame = command(value)?;

    let assignment = config
        .cmd_descr
        .iter()
        .find(|d| d.data_type == value.data_type())
        .map_or(Assignment::Unassigned, |d| d.assignment);
    Ok((frame, assignment))
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("registry", &self.inner.registry)
            .field("events", &self.inner.events)
            .field("dispatcher", &self.inner.dispatcher)
            .finish_non_exhaustive()
    }
}

/// Builder for a [`Hub`].
///
/// # Examples
///
/// ```
/// use ha_hub::{Hub, HubConfig};
/// use ha_hub::clock::Clock;
///
/// let (clock, _time) = Clock::manual(1_700_000_000);
/// let hub = Hub::builder(HubConfig::default()).with_clock(clock).build()?;
/// assert_eq!(hub.clock().now(), 1_700_000_000);
/// # Ok::<(), ha_hub::Error>(())
/// ```
pub struct HubBuilder {
    config: HubConfig,
    clock: Clock,
    apis: HashMap<DeviceType, Arc<dyn DeviceApi>>,
}

impl HubBuilder {
    /// Creates a builder with the built-in device types and the system clock.
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            clock: Clock::system(),
            apis: builtin_apis(),
        }
    }

    /// Sets the clock used for registration and default event timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Adds or replaces the capability table of a device type.
    #[must_use]
    pub fn with_device_api(mut self, device_type: DeviceType, api: Arc<dyn DeviceApi>) -> Self {
        self.apis.insert(device_type, api);
        self
    }

    /// Builds the hub.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the configuration
    /// does not validate.
    pub fn build(self) -> Result<Hub> {
        let config = self.config;
        config.validate()?;

        let stats = Arc::new(HubStats::new());
        let rooms = RoomTable::new(&config.rooms, &config.room_assocs);
        let registry = Registry::new(
            config.max_devices,
            self.apis,
            rooms,
            Arc::clone(&stats),
            self.clock.clone(),
        );
        let events = EventAlloc::new(config.max_events, config.data_heap_limit);
        let dispatcher = Arc::new(Dispatcher::new(config.max_subscriptions, Arc::clone(&stats)));

        tracing::debug!(
            max_devices = config.max_devices,
            max_events = config.max_events,
            max_subscriptions = config.max_subscriptions,
            "Hub created"
        );

        Ok(Hub {
            inner: Arc::new(HubInner {
                config,
                registry,
                events,
                dispatcher,
                stats,
                clock: self.clock,
            }),
        })
    }
}

impl fmt::Debug for HubBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubBuilder")
            .field("config", &self.config)
            .field("device_types", &self.apis.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
