// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Field-bus protocol state machine.
//!
//! The [`BusController`](super::BusController) worker owns one
//! [`BusProtocol`] and is the only caller of its methods. The protocol
//! keeps its own timers; the worker tells it how much time went by on each
//! call to [`BusProtocol::process`].

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;

use super::frame::{BusFrame, RawFrame};
use crate::device::BusDeviceId;

/// `ENOBUFS`, reported when the transmit queue is full.
pub const ENOBUFS: i32 = -105;

/// `EINVAL`, reported for malformed requests.
pub const EINVAL: i32 = -22;

/// Protocol-assigned identifier of an outstanding query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryHandle(pub u32);

impl fmt::Display for QueryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How an outstanding query ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// The device answered.
    Answered,
    /// The device answered with an error frame.
    AnsweredWithError,
    /// No answer before the query timeout.
    TimedOut,
    /// The protocol dropped the query.
    Cancelled,
}

/// Something the protocol reports back to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// An outstanding query completed.
    Completed {
        /// Handle returned by [`BusProtocol::query`].
        handle: QueryHandle,
        /// Outcome.
        status: CompletionStatus,
        /// The answer, if any.
        response: Option<BusFrame>,
    },
    /// A frame that answers no outstanding query.
    Unsolicited(BusFrame),
}

/// A field-bus protocol state machine.
pub trait BusProtocol: Send + 'static {
    /// Transmits `request` to `did` and starts waiting for its answer.
    ///
    /// Returns `Ok(Some(handle))` when an answer is expected, `Ok(None)` when
    /// the request was sent with no answer expected (`timeout` is zero).
    ///
    /// # Errors
    ///
    /// Returns a negative errno-style code if the request could not be sent.
    fn query(
        &mut self,
        did: BusDeviceId,
        request: &BusFrame,
        timeout: Duration,
    ) -> Result<Option<QueryHandle>, i32>;

    /// Transmits `request` to `did` without waiting for an answer.
    ///
    /// # Errors
    ///
    /// Returns a negative errno-style code if the request could not be sent.
    fn send(&mut self, did: BusDeviceId, request: &BusFrame) -> Result<(), i32>;

    /// Decodes a raw frame.
    fn decode(&self, raw: &RawFrame) -> Option<BusFrame> {
        BusFrame::from_raw(raw)
    }

    /// Advances the protocol timers by `elapsed` and processes `frame`.
    fn process(&mut self, elapsed: Duration, frame: Option<&BusFrame>) -> Vec<ProtocolEvent>;

    /// Returns the time until the next protocol deadline, if any.
    fn next_timeout(&self) -> Option<Duration>;
}

#[derive(Debug)]
struct Outstanding {
    handle: QueryHandle,
    did: BusDeviceId,
    request: BusFrame,
    remaining: Duration,
}

/// Field-bus controller protocol.
///
/// Frames are transmitted through a bounded channel towards the bus driver.
/// An answer matches the oldest outstanding query to the same device and
/// endpoint. Board-level telemetry matching no query is reported as
/// [`ProtocolEvent::Unsolicited`].
pub struct CaniotProtocol {
    tx: mpsc::Sender<RawFrame>,
    outstanding: Vec<Outstanding>,
    next_handle: u32,
}

impl CaniotProtocol {
    /// Creates a protocol transmitting through `tx`.
    #[must_use]
    pub fn new(tx: mpsc::Sender<RawFrame>) -> Self {
        Self {
            tx,
            outstanding: Vec::new(),
            next_handle: 1,
        }
    }

    /// Returns the number of queries waiting for an answer.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    fn transmit(&self, did: BusDeviceId, request: &BusFrame) -> Result<(), i32> {
        if request.did != did || request.is_response() {
            return Err(EINVAL);
        }
        self.tx.try_send(request.to_raw()).map_err(|e| {
            tracing::warn!(did = %did, error = %e, "Field-bus transmit queue unavailable");
            ENOBUFS
        })
    }

    fn allocate_handle(&mut self) -> QueryHandle {
        let handle = QueryHandle(self.next_handle);
        self.next_handle = self.next_handle.checked_add(1).unwrap_or(1);
        handle
    }
}

impl BusProtocol for CaniotProtocol {
    fn query(
        &mut self,
        did: BusDeviceId,
        request: &BusFrame,
        timeout: Duration,
    ) -> Result<Option<QueryHandle>, i32> {
        self.transmit(did, request)?;
        if timeout.is_zero() {
            return Ok(None);
        }

        let handle = self.allocate_handle();
        self.outstanding.push(Outstanding {
            handle,
            did,
            request: request.clone(),
            remaining: timeout,
        });
        Ok(Some(handle))
    }

    fn send(&mut self, did: BusDeviceId, request: &BusFrame) -> Result<(), i32> {
        self.transmit(did, request)
    }

    fn process(&mut self, elapsed: Duration, frame: Option<&BusFrame>) -> Vec<ProtocolEvent> {
        let mut events = Vec::new();

        // Answers first: a frame arriving with its deadline still counts.
        if let Some(frame) = frame.filter(|f| f.is_response()) {
            let matching = self
                .outstanding
                .iter()
                .position(|q| q.did == frame.did && frame.answers(&q.request));
            match matching {
                Some(index) => {
                    let query = self.outstanding.remove(index);
                    let status = if frame.is_error() {
                        CompletionStatus::AnsweredWithError
                    } else {
                        CompletionStatus::Answered
                    };
                    events.push(ProtocolEvent::Completed {
                        handle: query.handle,
                        status,
                        response: Some(frame.clone()),
                    });
                }
                None => events.push(ProtocolEvent::Unsolicited(frame.clone())),
            }
        }

        self.outstanding.retain_mut(|q| {
            q.remaining = q.remaining.saturating_sub(elapsed);
            if q.remaining.is_zero() {
                events.push(ProtocolEvent::Completed {
                    handle: q.handle,
                    status: CompletionStatus::TimedOut,
                    response: None,
                });
                false
            } else {
                true
            }
        });

        events
    }

    fn next_timeout(&self) -> Option<Duration> {
        self.outstanding.iter().map(|q| q.remaining).min()
    }
}

impl fmt::Debug for CaniotProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaniotProtocol")
            .field("outstanding", &self.outstanding.len())
            .field("next_handle", &self.next_handle)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::frame::{BusEndpoint, Direction, FrameType};

    fn did() -> BusDeviceId {
        BusDeviceId::new(1, 0).unwrap()
    }

    fn answer(frame_type: FrameType) -> BusFrame {
        BusFrame {
            frame_type,
            direction: Direction::Response,
            did: did(),
            endpoint: BusEndpoint::BoardControl,
            payload: vec![0; 8],
        }
    }

    #[test]
    fn zero_timeout_sends_without_waiting() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut proto = CaniotProtocol::new(tx);
        let request = BusFrame::telemetry_query(did(), BusEndpoint::BoardControl);

        assert_eq!(proto.query(did(), &request, Duration::ZERO), Ok(None));
        assert_eq!(rx.try_recv().unwrap(), request.to_raw());
        assert_eq!(proto.next_timeout(), None);
    }

    #[test]
    fn answer_completes_matching_query() {
        let (tx, _rx) = mpsc::channel(4);
        let mut proto = CaniotProtocol::new(tx);
        let request = BusFrame::telemetry_query(did(), BusEndpoint::BoardControl);
        let handle = proto
            .query(did(), &request, Duration::from_millis(100))
            .unwrap()
            .unwrap();

        let events = proto.process(Duration::from_millis(30), None);
        assert!(events.is_empty());
        assert_eq!(proto.next_timeout(), Some(Duration::from_millis(70)));

        let events = proto.process(Duration::from_millis(20), Some(&answer(FrameType::Telemetry)));
        assert_eq!(
            events,
            vec![ProtocolEvent::Completed {
                handle,
                status: CompletionStatus::Answered,
                response: Some(answer(FrameType::Telemetry)),
            }]
        );
        assert_eq!(proto.outstanding(), 0);
    }

    #[test]
    fn error_frame_and_timeout() {
        let (tx, _rx) = mpsc::channel(4);
        let mut proto = CaniotProtocol::new(tx);
        let request = BusFrame::command(did(), BusEndpoint::BoardControl, vec![1]);
        let first = proto.query(did(), &request, Duration::from_millis(50)).unwrap().unwrap();
        let second = proto.query(did(), &request, Duration::from_millis(50)).unwrap().unwrap();
        assert_ne!(first, second);

        let events = proto.process(Duration::ZERO, Some(&answer(FrameType::Command)));
        assert!(matches!(
            events[0],
            ProtocolEvent::Completed { handle, status: CompletionStatus::AnsweredWithError, .. } if handle == first
        ));

        let events = proto.process(Duration::from_millis(50), None);
        assert!(matches!(
            events[0],
            ProtocolEvent::Completed { handle, status: CompletionStatus::TimedOut, response: None } if handle == second
        ));
    }

    #[test]
    fn unmatched_telemetry_is_unsolicited() {
        let (tx, _rx) = mpsc::channel(1);
        let mut proto = CaniotProtocol::new(tx);
        let events = proto.process(Duration::ZERO, Some(&answer(FrameType::Telemetry)));
        assert_eq!(events, vec![ProtocolEvent::Unsolicited(answer(FrameType::Telemetry))]);
    }

    #[test]
    fn answer_must_match_the_query_type() {
        let (tx, _rx) = mpsc::channel(4);
        let mut proto = CaniotProtocol::new(tx);
        let request = BusFrame {
            frame_type: FrameType::ReadAttribute,
            direction: Direction::Query,
            did: did(),
            endpoint: BusEndpoint::BoardControl,
            payload: vec![0x10, 0x00],
        };
        let handle = proto
            .query(did(), &request, Duration::from_millis(100))
            .unwrap()
            .unwrap();

        // Late telemetry does not complete the attribute read.
        let events = proto.process(Duration::ZERO, Some(&answer(FrameType::Telemetry)));
        assert_eq!(events, vec![ProtocolEvent::Unsolicited(answer(FrameType::Telemetry))]);
        assert_eq!(proto.outstanding(), 1);

        let events = proto.process(Duration::ZERO, Some(&answer(FrameType::ReadAttribute)));
        assert!(matches!(
            events[0],
            ProtocolEvent::Completed { handle: h, status: CompletionStatus::Answered, .. } if h == handle
        ));
        assert_eq!(proto.outstanding(), 0);
    }

    #[test]
    fn full_transmit_queue() {
        let (tx, _rx) = mpsc::channel(1);
        let mut proto = CaniotProtocol::new(tx);
        let request = BusFrame::telemetry_query(did(), BusEndpoint::BoardControl);
        assert!(proto.send(did(), &request).is_ok());
        assert_eq!(proto.send(did(), &request), Err(ENOBUFS));
    }
}
