//! Per-request writer tasks for caller-supplied sinks.
//!
//! The dispatcher never awaits sink I/O. Every sink-bound request gets a task
//! that owns the sink, pulls response bytes from the transport when told to
//! and reports back once it is done. A stalled sink only stalls its own
//! request; the bytes behind it stay in the transport, whose high-water mark
//! bounds them.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::dispatcher::Message;
use crate::transport::{RequestHandle, Transport};

pub(crate) type BoxedSink = Box<dyn AsyncWrite + Send + Unpin>;

enum Command {
    /// Write out whatever the transport has buffered.
    Drain,
    /// Optionally drain, then flush and shut the sink down.
    Close { drain: bool },
}

/// Sent to the dispatcher when a writer ends on its own.
#[derive(Debug)]
pub(crate) struct SinkClosed {
    pub(crate) handle: RequestHandle,
    /// Bytes written to the sink.
    pub(crate) written: u64,
    /// First write, flush or shutdown error.
    pub(crate) result: io::Result<()>,
}

/// Handle to one writer task. Commands are tiny and only follow transport
/// signals, so the command queue never holds body bytes.
pub(crate) struct SinkWriter {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl SinkWriter {
    pub(crate) fn spawn(
        handle: RequestHandle,
        sink: BoxedSink,
        transport: Arc<dyn Transport>,
        report: mpsc::WeakUnboundedSender<Message>,
    ) -> Self {
        let (commands, queue) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let Some(closed) = run(handle, sink, transport.as_ref(), queue).await else {
                return;
            };
            if let Some(sender) = report.upgrade() {
                let _ = sender.send(Message::SinkClosed(closed));
            }
        });
        Self { commands, task }
    }

    pub(crate) fn drain(&self) {
        // A writer that already stopped has reported why.
        let _ = self.commands.send(Command::Drain);
    }

    pub(crate) fn close(&self, drain: bool) {
        let _ = self.commands.send(Command::Close { drain });
    }

    /// Stops the writer and drops the sink unflushed. The returned handle
    /// resolves once the sink is gone.
    pub(crate) fn discard(self) -> JoinHandle<()> {
        self.task.abort();
        self.task
    }
}

/// Returns `None` when the dispatcher dropped the writer without closing it.
async fn run(
    handle: RequestHandle,
    mut sink: BoxedSink,
    transport: &dyn Transport,
    mut queue: mpsc::UnboundedReceiver<Command>,
) -> Option<SinkClosed> {
    let mut written = 0;
    let result = loop {
        match queue.recv().await? {
            Command::Drain => {
                if let Err(e) = pull(handle, &mut sink, transport, &mut written).await {
                    debug!(%handle, error = %e, "sink write failed");
                    break Err(e);
                }
            }
            Command::Close { drain } => {
                let drained = if drain {
                    pull(handle, &mut sink, transport, &mut written).await
                } else {
                    Ok(())
                };
                let closed = async {
                    sink.flush().await?;
                    sink.shutdown().await
                }
                .await;
                break drained.and(closed);
            }
        }
    };
    drop(sink);
    trace!(%handle, written, "sink writer finished");
    Some(SinkClosed {
        handle,
        written,
        result,
    })
}

async fn pull(
    handle: RequestHandle,
    sink: &mut BoxedSink,
    transport: &dyn Transport,
    written: &mut u64,
) -> io::Result<()> {
    let data = transport.read_all(handle);
    if data.is_empty() {
        return Ok(());
    }
    trace!(%handle, bytes = data.len(), "writing response data");
    sink.write_all(&data).await?;
    *written += data.len() as u64;
    Ok(())
}
