use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// ProgressEvent
// ---------------------------------------------------------------------------

/// One human-readable progress update emitted by a pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A state-transition or informational line, optionally scoped to a
    /// truncated image ID (empty for repository-level lines).
    Status { id: String, message: String },
    /// A byte-progress update for a long-running action.
    Progress {
        id: String,
        action: String,
        current: u64,
        total: u64,
    },
}

impl ProgressEvent {
    pub fn status(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Status {
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn progress(id: impl Into<String>, action: impl Into<String>, current: u64, total: u64) -> Self {
        Self::Progress {
            id: id.into(),
            action: action.into(),
            current,
            total,
        }
    }
}

// ---------------------------------------------------------------------------
// ProgressSink
// ---------------------------------------------------------------------------

/// Destination for progress output. Implementations must tolerate concurrent
/// writers and must never block the caller.
pub trait ProgressSink: Send + Sync {
    fn write(&self, event: ProgressEvent);
}

/// Channel-backed sink; the common choice for callers and tests. A closed
/// receiver silently drops further events.
impl ProgressSink for mpsc::UnboundedSender<ProgressEvent> {
    fn write(&self, event: ProgressEvent) {
        let _ = self.send(event);
    }
}

/// Truncate an image identity to the short form used in progress output.
/// Identities come straight out of manifest JSON, so truncation must land on
/// a char boundary.
pub fn truncate_id(id: &str) -> &str {
    match id.char_indices().nth(12) {
        Some((boundary, _)) => &id[..boundary],
        None => id,
    }
}

// ---------------------------------------------------------------------------
// ProgressReader
// ---------------------------------------------------------------------------

/// AsyncRead adapter that reports byte progress to a sink as data flows
/// through it.
pub struct ProgressReader<R> {
    inner: R,
    sink: Arc<dyn ProgressSink>,
    id: String,
    action: String,
    current: u64,
    total: u64,
}

impl<R> ProgressReader<R> {
    pub fn new(
        inner: R,
        sink: Arc<dyn ProgressSink>,
        id: impl Into<String>,
        action: impl Into<String>,
        total: u64,
    ) -> Self {
        Self {
            inner,
            sink,
            id: id.into(),
            action: action.into(),
            current: 0,
            total,
        }
    }

    /// Unwrap the underlying reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let me = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut me.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let read = (buf.filled().len() - before) as u64;
                if read > 0 {
                    me.current += read;
                    me.sink.write(ProgressEvent::progress(
                        me.id.clone(),
                        me.action.clone(),
                        me.current,
                        me.total,
                    ));
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
