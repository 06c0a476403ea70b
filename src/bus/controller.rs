// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The query multiplexer: one worker task serializing every access to the
//! bus protocol.
//!
//! The worker waits on three sources: inbound frames, caller submissions and
//! the protocol's next deadline. Whatever wakes it, the protocol timers are
//! advanced by the elapsed time before anything else happens, so a new query
//! is never admitted against stale timers.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::frame::{BusFrame, RawFrame};
use super::protocol::{BusProtocol, CompletionStatus, ProtocolEvent, QueryHandle};
use crate::config::BusConfig;
use crate::device::{BusDeviceId, DeviceAddr};
use crate::error::{ConfigError, QueryError};
use crate::hub::Hub;
use crate::pool::Pool;

/// How a completed query ended, as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// The request was sent, no answer was expected.
    Sent,
    /// The device answered.
    Answered,
    /// The device answered with an error frame.
    AnsweredWithError,
}

/// Result of a successful [`BusController::query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryReply {
    /// Outcome.
    pub status: QueryStatus,
    /// The answer, absent for [`QueryStatus::Sent`].
    pub response: Option<BusFrame>,
    /// Time from submission to completion.
    pub elapsed: Duration,
}

#[derive(Debug)]
enum Outcome {
    Sent,
    Completed(CompletionStatus, Option<BusFrame>),
    Rejected(i32),
}

#[derive(Debug)]
struct Completion {
    outcome: Outcome,
    elapsed: Duration,
}

enum Submission {
    Query {
        did: BusDeviceId,
        request: BusFrame,
        timeout: Duration,
        submitted: Instant,
        reply: oneshot::Sender<Completion>,
    },
    Send {
        did: BusDeviceId,
        request: BusFrame,
    },
}

struct Parked {
    submitted: Instant,
    reply: oneshot::Sender<Completion>,
}

/// Handle to the query multiplexer worker.
///
/// # Examples
///
/// ```no_run
/// use ha_hub::BusConfig;
/// use ha_hub::bus::{BusController, BusEndpoint, BusFrame, CaniotProtocol};
/// use ha_hub::device::BusDeviceId;
///
/// # async fn example() -> ha_hub::Result<()> {
/// let (tx, _to_driver) = tokio::sync::mpsc::channel(16);
/// let bus = BusController::spawn(CaniotProtocol::new(tx), BusConfig::default(), None)?;
///
/// let did = BusDeviceId::new(1, 0).unwrap();
/// let reply = bus
///     .query(did, BusFrame::telemetry_query(did, BusEndpoint::BoardControl), 500)
///     .await?;
/// println!("answered in {:?}", reply.elapsed);
/// # Ok(())
/// # }
/// ```
pub struct BusController {
    config: BusConfig,
    submissions: mpsc::Sender<Submission>,
    frames: mpsc::Sender<RawFrame>,
    pending: Pool,
    worker: JoinHandle<()>,
}

impl BusController {
    /// Spawns the worker on the current Tokio runtime.
    ///
    /// When `hub` is set, board-level telemetry received from the bus is fed
    /// into it, registering field-bus devices as they show up.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `config` does not validate.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn spawn<P: BusProtocol>(
        protocol: P,
        config: BusConfig,
        hub: Option<Hub>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let (submissions, submission_rx) = mpsc::channel(config.submission_depth);
        let (frames, frame_rx) = mpsc::channel(config.frame_depth);

        let worker = Worker {
            protocol,
            submissions: submission_rx,
            frames: frame_rx,
            parked: HashMap::new(),
            hub,
            last: Instant::now(),
        };
        let worker = tokio::spawn(worker.run());

        tracing::debug!(
            max_pending = config.max_pending_queries,
            tolerance_ms = config.tolerance_ms,
            "Bus controller started"
        );

        Ok(Self {
            pending: Pool::new("pending query", config.max_pending_queries),
            config,
            submissions,
            frames,
            worker,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Returns the pending-query pool.
    #[must_use]
    pub fn pending(&self) -> &Pool {
        &self.pending
    }

    /// Returns a sender for frames received by the bus driver.
    #[must_use]
    pub fn frame_sender(&self) -> mpsc::Sender<RawFrame> {
        self.frames.clone()
    }

    /// Hands a received frame to the worker.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::WorkerStopped`] if the worker has exited.
    pub async fn receive(&self, frame: RawFrame) -> Result<(), QueryError> {
        self.frames
            .send(frame)
            .await
            .map_err(|_| QueryError::WorkerStopped)
    }

    /// Sends `request` to `did` without waiting for an answer.
    ///
    /// Never blocks. Transmission failures are logged by the worker.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Submission`] when the submission queue is full
    /// and [`QueryError::WorkerStopped`] if the worker has exited.
    pub fn send(&self, did: BusDeviceId, request: BusFrame) -> Result<(), QueryError> {
        self.submit(Submission::Send { did, request })
    }

    /// Sends `request` to `did` and waits up to `timeout_ms` for the answer.
    ///
    /// A zero timeout sends the request and returns [`QueryStatus::Sent`] as
    /// soon as it is on the bus.
    ///
    /// # Errors
    ///
    /// - [`QueryError::InvalidTimeout`] above the configured maximum
    /// - [`QueryError::NoMemory`] when every pending-query slot is taken
    /// - [`QueryError::TimedOut`] when the device did not answer in time
    /// - [`QueryError::Cancelled`] when the protocol dropped the query
    /// - [`QueryError::Submission`] when the protocol refused the request,
    ///   or with `ENOBUFS` when the submission queue is full
    /// - [`QueryError::Unresponsive`] when the worker did not complete the
    ///   query within `timeout_ms` plus the configured tolerance
    pub async fn query(
        &self,
        did: BusDeviceId,
        request: BusFrame,
        timeout_ms: u64,
    ) -> Result<QueryReply, QueryError> {
        if timeout_ms > self.config.max_query_timeout_ms {
            return Err(QueryError::InvalidTimeout(timeout_ms));
        }
        let _slot = self
            .pending
            .try_acquire()
            .map_err(|_| QueryError::NoMemory)?;

        let timeout = Duration::from_millis(timeout_ms);
        let (reply, completion) = oneshot::channel();
        let submission = Submission::Query {
            did,
            request,
            timeout,
            submitted: Instant::now(),
            reply,
        };

        self.submit(submission)?;

        let completion = match tokio::time::timeout(timeout + self.config.tolerance(), completion).await {
            Ok(result) => result.map_err(|_| QueryError::WorkerStopped)?,
            Err(_) => {
                tracing::error!(
                    did = %did,
                    timeout_ms,
                    tolerance_ms = self.config.tolerance_ms,
                    "Bus worker did not complete the query in time"
                );
                return Err(QueryError::Unresponsive(timeout_ms));
            }
        };

        let elapsed = completion.elapsed;
        match completion.outcome {
            Outcome::Sent => Ok(QueryReply {
                status: QueryStatus::Sent,
                response: None,
                elapsed,
            }),
            Outcome::Completed(CompletionStatus::Answered, response) => Ok(QueryReply {
                status: QueryStatus::Answered,
                response,
                elapsed,
            }),
            Outcome::Completed(CompletionStatus::AnsweredWithError, response) => Ok(QueryReply {
                status: QueryStatus::AnsweredWithError,
                response,
                elapsed,
            }),
            Outcome::Completed(CompletionStatus::TimedOut, _) => {
                Err(QueryError::TimedOut(timeout_ms))
            }
            Outcome::Completed(CompletionStatus::Cancelled, _) => Err(QueryError::Cancelled),
            Outcome::Rejected(code) => Err(QueryError::Submission(code)),
        }
    }

    fn submit(&self, submission: Submission) -> Result<(), QueryError> {
        self.submissions.try_send(submission).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueryError::Submission(super::ENOBUFS),
            mpsc::error::TrySendError::Closed(_) => QueryError::WorkerStopped,
        })
    }

    /// Stops the worker and waits for it to exit.
    ///
    /// Queries still parked complete with [`QueryError::WorkerStopped`].
    pub async fn shutdown(self) {
        let Self {
            submissions,
            frames,
            worker,
            ..
        } = self;
        drop(submissions);
        drop(frames);
        if let Err(e) = worker.await {
            tracing::warn!(error = %e, "Bus worker ended abnormally");
        }
    }
}

impl fmt::Debug for BusController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusController")
            .field("config", &self.config)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Worker
// ============================================================================

struct Worker<P> {
    protocol: P,
    submissions: mpsc::Receiver<Submission>,
    frames: mpsc::Receiver<RawFrame>,
    parked: HashMap<QueryHandle, Parked>,
    hub: Option<Hub>,
    last: Instant,
}

impl<P: BusProtocol> Worker<P> {
    async fn run(mut self) {
        let mut frames_open = true;

        loop {
            let deadline = self.protocol.next_timeout().map(|d| self.last + d);
            let sleep = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now));

            // Frames first: an answer already received must not time out
            // behind a new submission.
            tokio::select! {
                biased;
                frame = self.frames.recv(), if frames_open => match frame {
                    Some(raw) => {
                        let decoded = self.protocol.decode(&raw);
                        if decoded.is_none() {
                            tracing::debug!(id = raw.id, len = raw.data.len(), "Dropping undecodable frame");
                        }
                        self.advance(decoded.as_ref());
                    }
                    None => frames_open = false,
                },
                submission = self.submissions.recv() => match submission {
                    Some(submission) => {
                        self.advance(None);
                        self.admit(submission);
                    }
                    None => break,
                },
                () = sleep, if deadline.is_some() => self.advance(None),
            }
        }

        tracing::debug!(parked = self.parked.len(), "Bus worker stopped");
    }

    /// Advances the protocol by the time elapsed since the last call.
    fn advance(&mut self, frame: Option<&BusFrame>) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last);
        self.last = now;

        if let Some(frame) = frame {
            tracing::trace!(frame = %frame, "Frame received");
        }
        for event in self.protocol.process(elapsed, frame) {
            self.handle(event);
        }
    }

    fn admit(&mut self, submission: Submission) {
        match submission {
            Submission::Send { did, request } => {
                if let Err(code) = self.protocol.send(did, &request) {
                    tracing::warn!(did = %did, code, "Field-bus send failed");
                }
            }
            Submission::Query {
                did,
                request,
                timeout,
                submitted,
                reply,
            } => match self.protocol.query(did, &request, timeout) {
                Ok(Some(handle)) => {
                    tracing::debug!(did = %did, handle = %handle, "Query parked");
                    self.parked.insert(handle, Parked { submitted, reply });
                }
                Ok(None) => complete(reply, Outcome::Sent, submitted),
                Err(code) => {
                    tracing::debug!(did = %did, code, "Query refused by protocol");
                    complete(reply, Outcome::Rejected(code), submitted);
                }
            },
        }
    }

    fn handle(&mut self, event: ProtocolEvent) {
        match event {
            ProtocolEvent::Completed {
                handle,
                status,
                response,
            } => {
                if let Some(frame) = response.as_ref().filter(|f| f.is_board_telemetry()) {
                    self.forward(frame);
                }
                match self.parked.remove(&handle) {
                    Some(parked) => {
                        complete(parked.reply, Outcome::Completed(status, response), parked.submitted);
                    }
                    None => tracing::debug!(handle = %handle, "Completion for unknown query"),
                }
            }
            ProtocolEvent::Unsolicited(frame) => {
                if frame.is_board_telemetry() {
                    self.forward(&frame);
                } else {
                    tracing::debug!(frame = %frame, "Unsolicited frame ignored");
                }
            }
        }
    }

    fn forward(&self, frame: &BusFrame) {
        let Some(hub) = &self.hub else {
            return;
        };
        if let Err(e) = hub.register_data(&DeviceAddr::bus(frame.did), &frame.payload, 0) {
            tracing::debug!(did = %frame.did, error = %e, "Telemetry not ingested");
        }
    }
}

fn complete(reply: oneshot::Sender<Completion>, outcome: Outcome, submitted: Instant) {
    let completion = Completion {
        outcome,
        elapsed: submitted.elapsed(),
    };
    if reply.send(completion).is_err() {
        tracing::debug!("Query caller went away before completion");
    }
}
