// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the hub.
//!
//! Capacity problems (pools, device list, data budget) are routed to the
//! statistics block first and surface here only as typed values. Validation
//! problems are rejected at the API boundary. Field-bus error responses are
//! not errors at all: they complete a query with
//! [`QueryStatus::AnsweredWithError`](crate::bus::QueryStatus).

use thiserror::Error;

use crate::device::{DeviceType, EndpointId};

/// The main error type for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A fixed-capacity pool had no free slot.
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    /// Device registration or lookup failed.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// An inbound payload could not be turned into an event.
    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),

    /// Subscription configuration or lifecycle failure.
    #[error("subscription error: {0}")]
    Subscription(#[from] SubscriptionError),

    /// A field-bus query did not complete normally.
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// Configuration could not be loaded or is inconsistent.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised by [`Pool`](crate::pool::Pool) and
/// [`DataBudget`](crate::pool::DataBudget).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Every slot of the named pool is in use.
    #[error("{pool} pool exhausted ({capacity} slots)")]
    Exhausted {
        /// Pool name, for diagnostics.
        pool: &'static str,
        /// Total number of slots.
        capacity: usize,
    },

    /// The decoded-data budget cannot hold the requested buffer.
    #[error("data budget exhausted: requested {requested} bytes, {remaining} remaining")]
    NoMemory {
        /// Bytes requested.
        requested: usize,
        /// Bytes still available.
        remaining: usize,
    },
}

/// Errors related to the device registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The device list is full.
    #[error("device list full ({0} devices)")]
    OutOfCapacity(usize),

    /// No capability table exists for this device type.
    #[error("unsupported device type: {0}")]
    UnsupportedType(DeviceType),

    /// The capability table declared no endpoint.
    #[error("device declares no endpoint")]
    NoEndpoints,

    /// The capability table declared more endpoints than a device can hold.
    #[error("device declares {declared} endpoints, at most {max} supported")]
    TooManyEndpoints {
        /// Number of endpoints declared.
        declared: usize,
        /// Per-device endpoint capacity.
        max: usize,
    },

    /// The capability table failed to initialize its endpoints.
    #[error("endpoint initialization failed: {0}")]
    EndpointInit(String),

    /// An iteration range selected no device.
    #[error("no device in the requested range")]
    NoDevices,

    /// No device is registered under the given address.
    #[error("device not found")]
    DeviceNotFound,
}

/// Errors related to turning a raw payload into an event.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IngestError {
    /// The event pool is exhausted.
    #[error("event pool exhausted")]
    PoolExhausted,

    /// The device has no endpoint able to take the payload.
    #[error("no endpoint selected for payload")]
    NoEndpoint,

    /// The selected endpoint index does not exist on the device.
    #[error("endpoint index {0} is out of range")]
    InvalidEndpoint(usize),

    /// The endpoint does not accept commands.
    #[error("endpoint {0} has no command handler")]
    NoCommandHandler(EndpointId),

    /// The raw payload size differs from the endpoint's expected size.
    #[error("payload size mismatch: expected {expected} bytes, got {actual}")]
    PayloadSizeMismatch {
        /// Size declared by the endpoint.
        expected: usize,
        /// Size received.
        actual: usize,
    },

    /// The decoded-data budget cannot hold the buffer.
    #[error("no memory for {0} bytes of decoded data")]
    NoMemory(usize),

    /// The endpoint's decode function rejected the payload.
    #[error("decode failed: {0}")]
    Decode(String),

    /// The endpoint's command function rejected the command.
    #[error("command failed: {0}")]
    Command(String),
}

/// Errors related to subscriptions and extended filters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The subscription configuration is inconsistent.
    #[error("invalid subscription configuration: {0}")]
    InvalidConfig(&'static str),

    /// The subscription pool is exhausted.
    #[error("subscription pool exhausted")]
    PoolExhausted,

    /// The requested extended filter option is declared but not implemented.
    #[error("not supported: {0}")]
    NotSupported(&'static str),

    /// A custom filter is already installed on the configuration.
    #[error("a filter is already set")]
    FilterAlreadySet,
}

/// Errors returned by [`BusController::query`](crate::bus::BusController::query)
/// and [`BusController::send`](crate::bus::BusController::send).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// The requested timeout exceeds the configured maximum.
    #[error("invalid query timeout: {0} ms")]
    InvalidTimeout(u64),

    /// The pending-query pool is exhausted.
    #[error("no memory for a pending query")]
    NoMemory,

    /// The device did not answer within the query timeout.
    #[error("query timed out after {0} ms")]
    TimedOut(u64),

    /// The protocol layer cancelled the query.
    #[error("query cancelled")]
    Cancelled,

    /// The protocol layer refused the request.
    #[error("submission failed with code {0}")]
    Submission(i32),

    /// The worker never signalled the caller within timeout plus tolerance.
    #[error("bus worker unresponsive after {0} ms")]
    Unresponsive(u64),

    /// The worker task is gone.
    #[error("bus worker stopped")]
    WorkerStopped,
}

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration document is not valid JSON for the expected shape.
    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// A configuration value is out of range.
    #[error("invalid {field}: {message}")]
    Invalid {
        /// The offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

impl From<PoolError> for IngestError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Exhausted { .. } => Self::PoolExhausted,
            PoolError::NoMemory { requested, .. } => Self::NoMemory(requested),
        }
    }
}

/// Result type alias for hub operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_error_display() {
        let err = RegistryError::TooManyEndpoints {
            declared: 3,
            max: 2,
        };
        assert_eq!(
            err.to_string(),
            "device declares 3 endpoints, at most 2 supported"
        );
    }

    #[test]
    fn pool_error_maps_to_ingest_error() {
        let exhausted = PoolError::Exhausted {
            pool: "event",
            capacity: 4,
        };
        assert_eq!(IngestError::from(exhausted), IngestError::PoolExhausted);

        let no_mem = PoolError::NoMemory {
            requested: 12,
            remaining: 3,
        };
        assert_eq!(IngestError::from(no_mem), IngestError::NoMemory(12));
    }

    #[test]
    fn error_wraps_sub_errors() {
        let err: Error = QueryError::TimedOut(100).into();
        assert!(matches!(err, Error::Query(QueryError::TimedOut(100))));
        assert_eq!(err.to_string(), "query error: query timed out after 100 ms");
    }
}
