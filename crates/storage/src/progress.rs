//! Byte-counting stream decorator and periodic progress publishing.

use bytes::Bytes;
use futures::Stream;
use parcel_core::{UploadState, UploadStatus};
use std::fmt::Display;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How a tracked stream ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Terminal {
    /// The stream reported end-of-data.
    Eof,
    /// The stream or its sink failed.
    Failed(String),
}

/// Point-in-time view of a [`ProgressCounter`].
#[derive(Clone, Debug, PartialEq)]
pub struct Progress {
    /// Bytes consumed so far.
    pub n: i64,
    pub terminal: Option<Terminal>,
    /// Client-attached metadata, `Null` if none.
    pub extra: serde_json::Value,
}

impl Progress {
    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    pub fn is_done(&self) -> bool {
        matches!(self.terminal, Some(Terminal::Eof))
    }

    /// Render as the wire status record for an upload of `size` bytes.
    pub fn to_status(&self, size: i64) -> UploadStatus {
        UploadStatus {
            extra: self.extra.clone(),
            status: if self.is_done() {
                UploadState::Done
            } else {
                UploadState::Pending
            },
            n: self.n,
            size,
            error: match &self.terminal {
                Some(Terminal::Failed(message)) => Some(message.clone()),
                _ => None,
            },
        }
    }
}

/// Shared, thread-safe progress of one stream.
///
/// The byte count only grows, and stops changing once a terminal state
/// is recorded.
#[derive(Debug)]
pub struct ProgressCounter {
    state: RwLock<Progress>,
}

impl Default for ProgressCounter {
    fn default() -> Self {
        Self {
            state: RwLock::new(Progress {
                n: 0,
                terminal: None,
                extra: serde_json::Value::Null,
            }),
        }
    }
}

impl ProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A counter for an artifact that is already fully stored.
    pub fn completed(size: i64) -> Self {
        Self {
            state: RwLock::new(Progress {
                n: size,
                terminal: Some(Terminal::Eof),
                extra: serde_json::Value::Null,
            }),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Progress> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Progress {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn add(&self, bytes: usize) {
        let mut state = self.write();
        if state.terminal.is_none() {
            state.n = state.n.saturating_add(bytes as i64);
        }
    }

    /// Record end-of-data. Ignored once a terminal state is set.
    pub fn finish(&self) {
        let mut state = self.write();
        state.terminal.get_or_insert(Terminal::Eof);
    }

    /// Record a failure. Ignored once a terminal state is set.
    pub fn fail(&self, message: impl Into<String>) {
        let mut state = self.write();
        if state.terminal.is_none() {
            state.terminal = Some(Terminal::Failed(message.into()));
        }
    }

    pub fn set_extra(&self, extra: serde_json::Value) {
        self.write().extra = extra;
    }
}

/// Counts bytes as the wrapped stream is consumed.
pub struct ProgressReader<S> {
    inner: S,
    counter: Arc<ProgressCounter>,
}

impl<S> ProgressReader<S> {
    pub fn new(inner: S) -> Self {
        Self::with_counter(inner, Arc::new(ProgressCounter::new()))
    }

    pub fn with_counter(inner: S, counter: Arc<ProgressCounter>) -> Self {
        Self { inner, counter }
    }

    pub fn counter(&self) -> &Arc<ProgressCounter> {
        &self.counter
    }
}

impl<S, E> Stream for ProgressReader<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_next(cx);
        match &polled {
            Poll::Ready(Some(Ok(chunk))) => this.counter.add(chunk.len()),
            Poll::Ready(Some(Err(e))) => this.counter.fail(e.to_string()),
            Poll::Ready(None) => this.counter.finish(),
            Poll::Pending => {}
        }
        polled
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Publishes counter snapshots at a fixed interval.
pub struct Ticker;

impl Ticker {
    /// Emit a snapshot every `interval`, starting immediately.
    ///
    /// Stops after emitting a terminal snapshot, when `cancel` fires, or
    /// when the receiver is dropped.
    pub fn spawn(
        counter: Arc<ProgressCounter>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Progress> {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(interval.max(Duration::from_millis(1)));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticks.tick() => {
                        let snapshot = counter.snapshot();
                        let terminal = snapshot.is_terminal();
                        if tx.send(snapshot).await.is_err() || terminal {
                            break;
                        }
                    }
                }
            }
        });
        rx
    }
}
