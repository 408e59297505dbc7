//! Relay stage: send parts to the destination in order, with bounded retry.

use std::path::{Path, PathBuf};
use std::time::Duration;

use leech_protocol::{ChatRef, MediaKind, Progress, Stage, TransportError};
use leech_transfer::{MAX_CAPTION_NAME_LEN, truncate_name};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RetryPolicy;
use crate::error::RelayError;
use crate::ports::Sink;
use crate::reporter::ProgressReporter;
use crate::types::{Attachment, RelaySummary};

/// Flood-control waits tolerated per part before they count as attempts.
const MAX_RATE_LIMIT_WAITS: u32 = 5;

/// Extensions sent as streamable video when the file is a single part.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "webm"];

/// Relays `parts` to `chat` in order.
///
/// Each part is deleted right after it was sent. The first unrecoverable
/// error or a cancellation aborts the remaining parts, which stay on disk
/// for the caller's cleanup.
pub async fn relay(
    sink: &dyn Sink,
    chat: ChatRef,
    parts: &[PathBuf],
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    reporter: &ProgressReporter,
) -> Result<RelaySummary, RelayError> {
    let total_parts = parts.len();
    let mut summary = RelaySummary::default();

    for (idx, path) in parts.iter().enumerate() {
        let part = idx + 1;
        check_cancelled(cancel)?;

        let size = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RelayError::MissingPart(path.clone()));
            }
            Err(e) => {
                return Err(RelayError::Transport(TransportError::Failed(e.to_string())));
            }
        };

        let attachment = build_attachment(path, part, total_parts);
        let attempts = send_part(sink, chat, &attachment, policy, cancel, reporter, &mut summary)
            .await?;

        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!(path = %path.display(), error = %e, "failed to delete sent part");
        }

        summary.parts_sent += 1;
        summary.attempts_per_part.push(attempts);
        summary.bytes_sent += size;
        info!(part, parts = total_parts, bytes = size, attempts, "part relayed");
    }

    Ok(summary)
}

/// Sends one part, retrying transient failures. Returns the attempts used.
async fn send_part(
    sink: &dyn Sink,
    chat: ChatRef,
    attachment: &Attachment,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    reporter: &ProgressReporter,
    summary: &mut RelaySummary,
) -> Result<u32, RelayError> {
    let max_attempts = policy.max_attempts.max(1);
    let part_name = file_name(&attachment.path);
    let stage = Stage::Uploading {
        part: attachment.part,
        parts: attachment.parts,
    };
    let on_progress = |current: u64, total: u64| {
        reporter.update(Progress {
            stage,
            name: part_name.clone(),
            current,
            total,
        });
    };

    let mut attempt: u32 = 0;
    let mut rate_limit_waits: u32 = 0;

    loop {
        check_cancelled(cancel)?;
        attempt += 1;
        debug!(part = attachment.part, attempt, "sending part");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RelayError::Cancelled),
            result = sink.send(chat, attachment, &on_progress) => result,
        };

        let err = match result {
            Ok(()) => return Ok(attempt),
            Err(e) => e,
        };

        match err {
            TransportError::RateLimited { retry_after } if rate_limit_waits < MAX_RATE_LIMIT_WAITS => {
                rate_limit_waits += 1;
                attempt -= 1;
                warn!(
                    part = attachment.part,
                    retry_after_secs = retry_after.as_secs(),
                    "destination rate limited, waiting"
                );
                sleep_or_cancel(retry_after, cancel).await?;
            }
            e if !e.is_retryable() => {
                warn!(part = attachment.part, error = %e, "part rejected");
                return Err(RelayError::Transport(e));
            }
            e if attempt >= max_attempts => {
                return Err(RelayError::RetriesExhausted {
                    attempts: attempt,
                    last_cause: e,
                });
            }
            e => {
                warn!(
                    part = attachment.part,
                    attempt,
                    max_attempts,
                    error = %e,
                    "send failed, backing off"
                );
                summary.backoffs += 1;
                sleep_or_cancel(policy.backoff, cancel).await?;
            }
        }
    }
}

/// Caption and media kind for part `part` of `parts`.
pub fn build_attachment(path: &Path, part: usize, parts: usize) -> Attachment {
    let name = truncate_name(&file_name(path), MAX_CAPTION_NAME_LEN);

    let (caption, kind) = if parts == 1 {
        let kind = if is_video(path) {
            MediaKind::Video
        } else {
            MediaKind::Document
        };
        (format!("Uploaded: {name}"), kind)
    } else {
        (
            format!("Uploaded part {part}/{parts}: {name}"),
            MediaKind::Document,
        )
    };

    Attachment {
        path: path.to_path_buf(),
        caption,
        kind,
        part,
        parts,
    }
}

fn is_video(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<(), RelayError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RelayError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), RelayError> {
    if cancel.is_cancelled() {
        Err(RelayError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::ReportContext;
    use crate::test_support::{MockSink, RecordingNotifier};
    use leech_protocol::{MessageRef, OwnerId, TaskId};
    use std::sync::Arc;
    use tokio::time::Instant;

    const CHAT: ChatRef = ChatRef(-100);

    fn reporter() -> ProgressReporter {
        ProgressReporter::new(
            ReportContext {
                task: TaskId::new(),
                owner: OwnerId(1),
                message: MessageRef {
                    chat: CHAT,
                    message_id: 1,
                },
                notifier: Arc::new(RecordingNotifier::new()),
                mirror: None,
            },
            Duration::from_secs(3),
        )
    }

    fn write_parts(dir: &Path, base: &str, count: usize) -> Vec<PathBuf> {
        (1..=count)
            .map(|i| {
                let path = dir.join(format!("{base}.{i:03}"));
                std::fs::write(&path, vec![i as u8; 10]).unwrap();
                path
            })
            .collect()
    }

    fn failed() -> TransportError {
        TransportError::Failed("connection reset".into())
    }

    #[tokio::test]
    async fn relays_parts_in_order_and_deletes_them() {
        let dir = tempfile::tempdir().unwrap();
        let parts = write_parts(dir.path(), "movie.mkv", 3);
        let sink = MockSink::new();

        let summary = relay(
            &sink,
            CHAT,
            &parts,
            &RetryPolicy::default(),
            &CancellationToken::new(),
            &reporter(),
        )
        .await
        .unwrap();

        let sent = sink.sent();
        let names: Vec<&str> = sent.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["movie.mkv.001", "movie.mkv.002", "movie.mkv.003"]);
        assert_eq!(sent[1].caption, "Uploaded part 2/3: movie.mkv.002");
        assert!(sent.iter().all(|p| p.kind == MediaKind::Document));
        assert!(sent.iter().all(|p| p.chat == CHAT));

        assert_eq!(summary.parts_sent, 3);
        assert_eq!(summary.attempts_per_part, vec![1, 1, 1]);
        assert_eq!(summary.backoffs, 0);
        assert_eq!(summary.bytes_sent, 30);
        assert!(parts.iter().all(|p| !p.exists()));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_after_two_backoffs() {
        let dir = tempfile::tempdir().unwrap();
        let parts = write_parts(dir.path(), "f.bin", 1);
        let sink = MockSink::new().with_failures(vec![failed(), failed()]);

        let start = Instant::now();
        let summary = relay(
            &sink,
            CHAT,
            &parts,
            &RetryPolicy::default(),
            &CancellationToken::new(),
            &reporter(),
        )
        .await
        .unwrap();

        assert_eq!(sink.calls(), 3);
        assert_eq!(sink.sent().len(), 1, "exactly one successful send");
        assert_eq!(summary.backoffs, 2);
        assert_eq!(summary.attempts_per_part, vec![3]);
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_abort_remaining_parts() {
        let dir = tempfile::tempdir().unwrap();
        let parts = write_parts(dir.path(), "f.bin", 2);
        let sink = MockSink::new().with_failures(vec![failed(), failed(), failed()]);

        let err = relay(
            &sink,
            CHAT,
            &parts,
            &RetryPolicy::default(),
            &CancellationToken::new(),
            &reporter(),
        )
        .await
        .unwrap_err();

        match err {
            RelayError::RetriesExhausted {
                attempts,
                last_cause,
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_cause, failed());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(sink.calls(), 3);
        assert!(sink.sent().is_empty());
        assert!(parts.iter().all(|p| p.exists()));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let parts = write_parts(dir.path(), "f.bin", 1);
        let sink =
            MockSink::new().with_failures(vec![TransportError::Rejected("file too big".into())]);

        let err = relay(
            &sink,
            CHAT,
            &parts,
            &RetryPolicy::default(),
            &CancellationToken::new(),
            &reporter(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, RelayError::Transport(TransportError::Rejected(_))));
        assert_eq!(sink.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_does_not_consume_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let parts = write_parts(dir.path(), "f.bin", 1);
        let sink = MockSink::new().with_failures(vec![
            TransportError::RateLimited {
                retry_after: Duration::from_secs(30),
            },
            failed(),
            failed(),
        ]);

        let start = Instant::now();
        let summary = relay(
            &sink,
            CHAT,
            &parts,
            &RetryPolicy::default(),
            &CancellationToken::new(),
            &reporter(),
        )
        .await
        .unwrap();

        assert_eq!(sink.calls(), 4);
        assert_eq!(summary.attempts_per_part, vec![3]);
        assert_eq!(summary.backoffs, 2);
        assert!(start.elapsed() >= Duration::from_secs(40));
    }

    #[tokio::test]
    async fn cancel_after_n_of_m_parts() {
        let dir = tempfile::tempdir().unwrap();
        let parts = write_parts(dir.path(), "f.bin", 5);
        let cancel = CancellationToken::new();
        let hook_cancel = cancel.clone();
        let sink = MockSink::new().with_after_send(move |sent| {
            if sent == 2 {
                hook_cancel.cancel();
            }
        });

        let err = relay(
            &sink,
            CHAT,
            &parts,
            &RetryPolicy::default(),
            &cancel,
            &reporter(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, RelayError::Cancelled));
        assert_eq!(sink.calls(), 2, "no part is sent after the cancel");
        let remaining: Vec<bool> = parts.iter().map(|p| p.exists()).collect();
        assert_eq!(remaining, vec![false, false, true, true, true]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let parts = write_parts(dir.path(), "f.bin", 1);
        let sink = MockSink::new().with_failures(vec![failed()]);
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                cancel.cancel();
            })
        };

        let start = Instant::now();
        let err = relay(
            &sink,
            CHAT,
            &parts,
            &RetryPolicy::default(),
            &cancel,
            &reporter(),
        )
        .await
        .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, RelayError::Cancelled));
        assert_eq!(sink.calls(), 1);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    /// Sink whose send never completes.
    struct HangingSink {
        calls: std::sync::atomic::AtomicUsize,
    }

    impl Sink for HangingSink {
        fn send<'a>(
            &'a self,
            _chat: ChatRef,
            _attachment: &'a Attachment,
            on_progress: &'a (dyn Fn(u64, u64) + Send + Sync),
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), TransportError>> + Send + 'a>>
        {
            Box::pin(async move {
                self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                on_progress(1, 10);
                std::future::pending::<Result<(), TransportError>>().await
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_aborts_in_flight_send() {
        let dir = tempfile::tempdir().unwrap();
        let parts = write_parts(dir.path(), "f.bin", 2);
        let sink = HangingSink {
            calls: Default::default(),
        };
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                cancel.cancel();
            })
        };

        let err = relay(
            &sink,
            CHAT,
            &parts,
            &RetryPolicy::default(),
            &cancel,
            &reporter(),
        )
        .await
        .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, RelayError::Cancelled));
        assert_eq!(sink.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(parts[0].exists(), "an unsent part is left for cleanup");
        assert!(parts[1].exists());
    }

    #[tokio::test]
    async fn missing_part_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let parts = vec![dir.path().join("gone.001")];
        let sink = MockSink::new();

        let err = relay(
            &sink,
            CHAT,
            &parts,
            &RetryPolicy::default(),
            &CancellationToken::new(),
            &reporter(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, RelayError::MissingPart(p) if p == parts[0]));
        assert_eq!(sink.calls(), 0);
    }

    #[test]
    fn single_video_part_is_streamable() {
        let a = build_attachment(Path::new("/w/clip.MP4"), 1, 1);
        assert_eq!(a.kind, MediaKind::Video);
        assert_eq!(a.caption, "Uploaded: clip.MP4");

        let doc = build_attachment(Path::new("/w/archive.zip"), 1, 1);
        assert_eq!(doc.kind, MediaKind::Document);

        let part = build_attachment(Path::new("/w/clip.mp4.001"), 1, 2);
        assert_eq!(part.kind, MediaKind::Document);
        assert_eq!(part.caption, "Uploaded part 1/2: clip.mp4.001");
    }

    #[test]
    fn long_names_are_truncated_in_captions() {
        let long = format!("/w/{}.mkv", "a".repeat(300));
        let a = build_attachment(Path::new(&long), 1, 1);
        let name = a.caption.trim_start_matches("Uploaded: ");
        assert_eq!(name.chars().count(), MAX_CAPTION_NAME_LEN);
        assert!(name.ends_with(".mkv"));
    }
}
