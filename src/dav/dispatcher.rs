//! The single task that drives every request through its lifecycle.
//!
//! Registrations from the client and events from the transport arrive on one
//! channel, so a request's bindings are always in the table before its first
//! event is handled. Only this task touches the binding tables, and it never
//! waits on a caller's sink: sink I/O runs in per-request writer tasks that
//! report back on the same channel.
//!
//! ```text
//! Register ─► Submitted ─► ResponseHeaders ─► DataAvailable* ─► Completed
//!                 │                                          ├─► Failed(error)
//!                 └──► AuthenticationRequired (once)         └─► Failed(cancelled)
//! ```
//!
//! On `Completed` or `Failed(error)` a sink-bound request waits for its writer
//! to flush and shut the sink down before the reply resolves. On cancellation
//! the writer is stopped and the sink dropped unflushed. Either way a
//! `Release` is queued behind any events still pending; the transport state
//! and the outbound body are freed when that `Release` comes around.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use reqwest::StatusCode;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::auth::{AuthState, ChallengeDecision};
use super::client::{Completion, ErrorEvent, Outcome};
use super::error::DavError;
use super::sink::{BoxedSink, SinkClosed, SinkWriter};
use crate::transport::{
    AuthChallenge, Credentials, FailureCause, RequestHandle, Transport, TransportEvent,
    TransportFailure,
};

/// Input to the dispatcher.
pub(crate) enum Message {
    Register(Registration),
    Transport(TransportEvent),
    /// A sink writer ended on its own.
    SinkClosed(SinkClosed),
    /// Cancellation from the client. The transport is aborted directly; this
    /// covers requests whose transport side already ended.
    Cancel(RequestHandle),
    /// Deferred release of a finished request.
    Release(RequestHandle),
}

/// Everything the dispatcher needs to drive one request.
pub(crate) struct Registration {
    pub(crate) handle: RequestHandle,
    pub(crate) url: String,
    pub(crate) inbound: Inbound,
    /// In-memory request body, kept alive until the request is released.
    pub(crate) outbound: Option<Bytes>,
    /// Start offset of a range fetch; `0` when no range was requested.
    pub(crate) range_from: u64,
    pub(crate) credentials: Credentials,
    pub(crate) done: oneshot::Sender<Outcome>,
}

/// Where response body bytes go.
pub(crate) enum Inbound {
    /// No caller sink: collect the body and hand it back on completion.
    Collect(BytesMut),
    Sink(BoxedSink),
}

enum Delivery {
    Collect(BytesMut),
    Writer(SinkWriter),
    /// The writer stopped after a failed write; the request is being aborted.
    Detached,
}

/// Terminal state held while the sink writer closes.
enum Closing {
    Completed(StatusCode),
    Failed(DavError),
}

struct InFlight {
    url: String,
    delivery: Delivery,
    range_from: u64,
    credentials: Credentials,
    done: oneshot::Sender<Outcome>,
    bytes_received: u64,
    /// Set when the dispatcher itself aborted the request.
    abort_reason: Option<DavError>,
    /// Set once the terminal event arrived and the writer is closing the sink.
    closing: Option<Closing>,
}

pub(crate) struct Dispatcher {
    transport: Arc<dyn Transport>,
    errors: broadcast::Sender<ErrorEvent>,
    /// Weak so the dispatcher never keeps its own queue open.
    requeue: mpsc::WeakUnboundedSender<Message>,
    in_flight: HashMap<RequestHandle, InFlight>,
    outbound: HashMap<RequestHandle, Bytes>,
    auth: AuthState,
}

impl Dispatcher {
    /// Spawns the dispatcher. It stops once every sender of `queue` is gone
    /// and the queue is drained.
    pub(crate) fn spawn(
        transport: Arc<dyn Transport>,
        errors: broadcast::Sender<ErrorEvent>,
        sender: &mpsc::UnboundedSender<Message>,
        queue: mpsc::UnboundedReceiver<Message>,
    ) -> JoinHandle<()> {
        let dispatcher = Self {
            transport,
            errors,
            requeue: sender.downgrade(),
            in_flight: HashMap::new(),
            outbound: HashMap::new(),
            auth: AuthState::default(),
        };
        tokio::spawn(dispatcher.run(queue))
    }

    async fn run(mut self, mut queue: mpsc::UnboundedReceiver<Message>) {
        while let Some(message) = queue.recv().await {
            match message {
                Message::Register(registration) => self.register(registration),
                Message::Transport(event) => self.on_event(event),
                Message::SinkClosed(closed) => self.on_sink_closed(closed),
                Message::Cancel(handle) => self.on_cancel(handle),
                Message::Release(handle) => self.release(handle),
            }
        }
        if !self.in_flight.is_empty() {
            warn!(
                pending = self.in_flight.len(),
                "dispatcher stopping with requests still in flight"
            );
        }
        debug!("dispatcher stopped");
    }

    fn register(&mut self, registration: Registration) {
        let Registration {
            handle,
            url,
            inbound,
            outbound,
            range_from,
            credentials,
            done,
        } = registration;
        trace!(%handle, %url, "registered request");
        if let Some(body) = outbound {
            self.outbound.insert(handle, body);
        }
        let delivery = match inbound {
            Inbound::Collect(buffer) => Delivery::Collect(buffer),
            Inbound::Sink(sink) => Delivery::Writer(SinkWriter::spawn(
                handle,
                sink,
                Arc::clone(&self.transport),
                self.requeue.clone(),
            )),
        };
        self.in_flight.insert(
            handle,
            InFlight {
                url,
                delivery,
                range_from,
                credentials,
                done,
                bytes_received: 0,
                abort_reason: None,
                closing: None,
            },
        );
    }

    fn on_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::ResponseHeaders { handle, status } => {
                self.on_response_headers(handle, status);
            }
            TransportEvent::DataAvailable { handle } => self.on_data_available(handle),
            TransportEvent::AuthenticationRequired { handle, challenge } => {
                self.on_challenge(handle, challenge);
            }
            TransportEvent::Completed { handle, status } => self.on_completed(handle, status),
            TransportEvent::Failed {
                handle,
                cause: FailureCause::Cancelled,
            } => self.on_cancelled(handle),
            TransportEvent::Failed {
                handle,
                cause: FailureCause::Error(failure),
            } => self.on_failed(handle, failure),
        }
    }

    fn on_response_headers(&mut self, handle: RequestHandle, status: StatusCode) {
        let Some(entry) = self.in_flight.get(&handle) else {
            return;
        };
        debug!(%handle, %status, "response headers");
        // Error statuses fail through the transport; only a successful
        // full-body answer to a range request is wrong here.
        if entry.range_from > 0 && status.is_success() && status != StatusCode::PARTIAL_CONTENT {
            let reason = DavError::range_not_honoured(&entry.url, entry.range_from, status);
            self.abort_with(handle, reason);
        }
    }

    fn on_data_available(&mut self, handle: RequestHandle) {
        let Some(entry) = self.in_flight.get_mut(&handle) else {
            return;
        };
        if entry.abort_reason.is_some() {
            return;
        }
        match &mut entry.delivery {
            Delivery::Collect(buffer) => {
                let data = self.transport.read_all(handle);
                trace!(%handle, bytes = data.len(), "collecting response data");
                entry.bytes_received += data.len() as u64;
                buffer.extend_from_slice(&data);
            }
            Delivery::Writer(writer) => writer.drain(),
            Delivery::Detached => {}
        }
    }

    fn on_challenge(&mut self, handle: RequestHandle, challenge: AuthChallenge) {
        let Some(entry) = self.in_flight.get(&handle) else {
            challenge.decline();
            return;
        };
        match self.auth.on_challenge(handle) {
            ChallengeDecision::Answer => {
                debug!(%handle, realm = ?challenge.realm(), "answering authentication challenge");
                challenge.answer(entry.credentials.clone());
            }
            ChallengeDecision::Reject => {
                let reason = DavError::authentication_rejected(&entry.url);
                self.abort_with(handle, reason);
                challenge.decline();
            }
        }
    }

    fn on_completed(&mut self, handle: RequestHandle, status: StatusCode) {
        self.auth.forget(handle);
        let Some(mut entry) = self.in_flight.remove(&handle) else {
            self.schedule_release(handle);
            return;
        };
        let drain = entry.abort_reason.is_none();
        if drain && let Delivery::Collect(buffer) = &mut entry.delivery {
            let rest = self.transport.read_all(handle);
            entry.bytes_received += rest.len() as u64;
            buffer.extend_from_slice(&rest);
        }
        self.close_or_settle(handle, entry, Closing::Completed(status), drain);
    }

    fn on_cancelled(&mut self, handle: RequestHandle) {
        self.auth.forget(handle);
        let Some(entry) = self.in_flight.remove(&handle) else {
            self.schedule_release(handle);
            return;
        };
        if entry.abort_reason.is_none() {
            debug!(%handle, "request cancelled");
        }
        self.discard(handle, entry);
    }

    fn on_failed(&mut self, handle: RequestHandle, failure: TransportFailure) {
        self.auth.forget(handle);
        let Some(entry) = self.in_flight.remove(&handle) else {
            self.schedule_release(handle);
            return;
        };
        if entry.abort_reason.is_none() {
            warn!(%handle, error = %failure, "request failed");
            self.publish(handle, failure.to_string());
        }
        let error = DavError::transport(handle, failure);
        self.close_or_settle(handle, entry, Closing::Failed(error), false);
    }

    /// Stops a request whose transport side already ended but whose sink is
    /// still closing. Anything earlier was aborted through the transport.
    fn on_cancel(&mut self, handle: RequestHandle) {
        if !self
            .in_flight
            .get(&handle)
            .is_some_and(|entry| entry.closing.is_some())
        {
            return;
        }
        if let Some(entry) = self.in_flight.remove(&handle) {
            debug!(%handle, "cancelled while closing sink");
            self.discard(handle, entry);
        }
    }

    fn on_sink_closed(&mut self, closed: SinkClosed) {
        let SinkClosed {
            handle,
            written,
            result,
        } = closed;
        let Some(mut entry) = self.in_flight.remove(&handle) else {
            return;
        };
        entry.bytes_received = written;
        match entry.closing.take() {
            Some(closing) => self.settle(handle, entry, closing, result),
            None => {
                // Stopped mid-stream, which only a failed write does.
                entry.delivery = Delivery::Detached;
                let url = entry.url.clone();
                self.in_flight.insert(handle, entry);
                if let Err(e) = result {
                    self.abort_with(handle, DavError::sink(url, e));
                }
            }
        }
    }

    /// Hands the terminal state to the sink writer, or settles right away
    /// when there is no writer to wait for.
    fn close_or_settle(
        &mut self,
        handle: RequestHandle,
        mut entry: InFlight,
        closing: Closing,
        drain: bool,
    ) {
        if let Delivery::Writer(writer) = &entry.delivery {
            writer.close(drain);
            entry.closing = Some(closing);
            self.in_flight.insert(handle, entry);
            return;
        }
        self.settle(handle, entry, closing, Ok(()));
    }

    /// Resolves the reply of a request whose sink is closed.
    fn settle(
        &mut self,
        handle: RequestHandle,
        entry: InFlight,
        closing: Closing,
        closed: io::Result<()>,
    ) {
        self.schedule_release(handle);
        let InFlight {
            url,
            delivery,
            done,
            bytes_received,
            abort_reason,
            ..
        } = entry;

        let outcome = match (abort_reason, closing) {
            (Some(reason), _) => Outcome::Failed(reason),
            (None, Closing::Failed(error)) => {
                if let Err(e) = closed {
                    debug!(%handle, error = %e, "closing sink after failure");
                }
                Outcome::Failed(error)
            }
            (None, Closing::Completed(status)) => match closed {
                Ok(()) => {
                    debug!(%handle, %status, bytes = bytes_received, "request completed");
                    let body = match delivery {
                        Delivery::Collect(buffer) => Some(buffer.freeze()),
                        Delivery::Writer(_) | Delivery::Detached => None,
                    };
                    Outcome::Completed(Completion {
                        status,
                        bytes_received,
                        body,
                    })
                }
                Err(e) => {
                    let reason = DavError::sink(&url, e);
                    warn!(%handle, error = %reason, "request completed but sink failed");
                    self.publish(handle, reason.to_string());
                    Outcome::Failed(reason)
                }
            },
        };
        let _ = done.send(outcome);
    }

    /// Drops the request's sink unflushed and resolves its reply as cancelled,
    /// or with the abort reason the dispatcher recorded.
    fn discard(&mut self, handle: RequestHandle, entry: InFlight) {
        self.schedule_release(handle);
        let InFlight {
            delivery,
            done,
            abort_reason,
            ..
        } = entry;
        let outcome = abort_reason.map_or(Outcome::Cancelled, Outcome::Failed);
        match delivery {
            Delivery::Writer(writer) => {
                let stopped = writer.discard();
                // The reply resolves only after the sink is gone.
                tokio::spawn(async move {
                    let _ = stopped.await;
                    let _ = done.send(outcome);
                });
            }
            Delivery::Collect(_) | Delivery::Detached => {
                let _ = done.send(outcome);
            }
        }
    }

    /// Aborts a request for a reason the dispatcher found itself. The reason is
    /// published now and reported when the transport's cancellation arrives.
    fn abort_with(&mut self, handle: RequestHandle, reason: DavError) {
        let Some(entry) = self.in_flight.get_mut(&handle) else {
            return;
        };
        if entry.abort_reason.is_some() {
            return;
        }
        let description = reason.to_string();
        warn!(%handle, error = %description, "aborting request");
        entry.abort_reason = Some(reason);
        self.publish(handle, description);
        self.transport.abort(handle);
    }

    fn publish(&self, handle: RequestHandle, description: String) {
        // No subscribers is fine.
        let _ = self.errors.send(ErrorEvent {
            handle,
            description,
        });
    }

    /// Queues the release behind whatever is already pending, or releases now
    /// when the queue is closing.
    fn schedule_release(&mut self, handle: RequestHandle) {
        if let Some(sender) = self.requeue.upgrade()
            && sender.send(Message::Release(handle)).is_ok()
        {
            return;
        }
        self.release(handle);
    }

    fn release(&mut self, handle: RequestHandle) {
        let had_body = self.outbound.remove(&handle).is_some();
        self.transport.release(handle);
        trace!(%handle, had_body, "released request");
    }
}
