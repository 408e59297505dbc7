//! Mock capabilities shared by the engine's unit tests.

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use leech_protocol::{
    ChatRef, MediaKind, MessageRef, NotifyError, Source, TransportError,
};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::Instant;

use crate::error::FetchError;
use crate::ports::{Notifier, Resolver, Sink};
use crate::types::{Attachment, Resolved};

/// Lets spawned tasks run on the current-thread test runtime.
pub(crate) async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Notifier that records every call and can be told to fail.
pub(crate) struct RecordingNotifier {
    emissions: Mutex<Vec<(Instant, String)>>,
    failures: Mutex<VecDeque<NotifyError>>,
}

impl RecordingNotifier {
    pub(crate) fn new() -> Self {
        Self {
            emissions: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn fail_next(&self, err: NotifyError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub(crate) fn count(&self) -> usize {
        self.emissions.lock().unwrap().len()
    }

    pub(crate) fn texts(&self) -> Vec<String> {
        self.emissions
            .lock()
            .unwrap()
            .iter()
            .map(|(_, t)| t.clone())
            .collect()
    }

    pub(crate) fn times(&self) -> Vec<Instant> {
        self.emissions.lock().unwrap().iter().map(|(at, _)| *at).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn emit(
        &self,
        _target: MessageRef,
        text: String,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>> {
        Box::pin(async move {
            self.emissions.lock().unwrap().push((Instant::now(), text));
            match self.failures.lock().unwrap().pop_front() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Reader that never yields data.
pub(crate) struct StalledReader;

impl AsyncRead for StalledReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

/// Reader that serves `data` in small slices and fails after it.
pub(crate) struct FailingReader {
    data: Vec<u8>,
    pos: usize,
}

impl AsyncRead for FailingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.pos >= self.data.len() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )));
        }
        let n = buf.remaining().min(self.data.len() - self.pos).min(16);
        let start = self.pos;
        buf.put_slice(&self.data[start..start + n]);
        self.pos += n;
        Poll::Ready(Ok(()))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReaderMode {
    Complete,
    Stalled,
    Failing,
}

/// Resolver serving a fixed byte buffer.
pub(crate) struct MockResolver {
    data: Vec<u8>,
    name: String,
    advertised: Option<u64>,
    mode: ReaderMode,
    error: Mutex<Option<FetchError>>,
    calls: AtomicUsize,
}

impl MockResolver {
    pub(crate) fn new(name: &str, data: Vec<u8>) -> Self {
        Self {
            data,
            name: name.into(),
            advertised: None,
            mode: ReaderMode::Complete,
            error: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn stalled(name: &str) -> Self {
        Self {
            mode: ReaderMode::Stalled,
            ..Self::new(name, Vec::new())
        }
    }

    pub(crate) fn failing(name: &str, data: Vec<u8>) -> Self {
        Self {
            mode: ReaderMode::Failing,
            ..Self::new(name, data)
        }
    }

    pub(crate) fn with_advertised(mut self, size: u64) -> Self {
        self.advertised = Some(size);
        self
    }

    pub(crate) fn with_error(self, err: FetchError) -> Self {
        *self.error.lock().unwrap() = Some(err);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Resolver for MockResolver {
    fn resolve<'a>(
        &'a self,
        _source: &'a Source,
    ) -> Pin<Box<dyn Future<Output = Result<Resolved, FetchError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.error.lock().unwrap().take() {
                return Err(err);
            }

            let reader: Box<dyn AsyncRead + Send + Unpin> = match self.mode {
                ReaderMode::Complete => Box::new(io::Cursor::new(self.data.clone())),
                ReaderMode::Stalled => Box::new(StalledReader),
                ReaderMode::Failing => Box::new(FailingReader {
                    data: self.data.clone(),
                    pos: 0,
                }),
            };
            Ok(Resolved {
                reader,
                advertised_size: self.advertised.unwrap_or(self.data.len() as u64),
                suggested_name: self.name.clone(),
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// A part the mock sink accepted.
#[derive(Debug, Clone)]
pub(crate) struct SentPart {
    pub(crate) chat: ChatRef,
    pub(crate) name: String,
    pub(crate) caption: String,
    pub(crate) kind: MediaKind,
    pub(crate) data: Vec<u8>,
}

type AfterSend = Box<dyn Fn(usize) + Send + Sync>;

/// Sink that reads each part into memory and follows a failure script.
pub(crate) struct MockSink {
    sent: Mutex<Vec<SentPart>>,
    script: Mutex<VecDeque<TransportError>>,
    after_send: Option<AfterSend>,
    calls: AtomicUsize,
}

impl MockSink {
    pub(crate) fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            after_send: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// The next attempts fail with these errors, in order.
    pub(crate) fn with_failures(self, errors: Vec<TransportError>) -> Self {
        *self.script.lock().unwrap() = errors.into();
        self
    }

    /// Runs `hook(parts_sent_so_far)` after every successful send.
    pub(crate) fn with_after_send(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.after_send = Some(Box::new(hook));
        self
    }

    pub(crate) fn sent(&self) -> Vec<SentPart> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Sink for MockSink {
    fn send<'a>(
        &'a self,
        chat: ChatRef,
        attachment: &'a Attachment,
        on_progress: &'a (dyn Fn(u64, u64) + Send + Sync),
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let scripted = self.script.lock().unwrap().pop_front();
            if let Some(err) = scripted {
                return Err(err);
            }

            let data = std::fs::read(&attachment.path)
                .map_err(|e| TransportError::Failed(e.to_string()))?;
            let total = data.len() as u64;
            on_progress(total / 2, total);
            on_progress(total, total);

            let name = attachment
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let count = {
                let mut sent = self.sent.lock().unwrap();
                sent.push(SentPart {
                    chat,
                    name,
                    caption: attachment.caption.clone(),
                    kind: attachment.kind,
                    data,
                });
                sent.len()
            };
            if let Some(hook) = &self.after_send {
                hook(count);
            }
            Ok(())
        })
    }
}
