//! Sink that delivers parts into a local outbox directory.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use leech_engine::{Attachment, Sink};
use leech_protocol::{ChatRef, TransportError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Progress granularity of a copy.
const COPY_CHUNK: usize = 64 * 1024;

/// Copies each part into `<outbox>/<chat>/`.
///
/// A part is written under a `.partial` name and renamed once complete, so
/// a send dropped halfway never leaves a file that looks delivered. The
/// `.partial` file is removed when the send fails or is dropped.
pub struct DirectorySink {
    outbox: PathBuf,
    max_size: u64,
}

impl DirectorySink {
    pub fn new(outbox: impl Into<PathBuf>, max_size: u64) -> Self {
        Self {
            outbox: outbox.into(),
            max_size,
        }
    }

    async fn deliver(
        &self,
        chat: ChatRef,
        attachment: &Attachment,
        on_progress: &(dyn Fn(u64, u64) + Send + Sync),
    ) -> Result<(), TransportError> {
        let name = attachment
            .path
            .file_name()
            .ok_or_else(|| TransportError::Rejected("part has no file name".into()))?;

        let mut src = tokio::fs::File::open(&attachment.path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => TransportError::Rejected("part not found".into()),
                _ => TransportError::Failed(e.to_string()),
            })?;
        let total = src
            .metadata()
            .await
            .map_err(|e| TransportError::Failed(e.to_string()))?
            .len();
        if total > self.max_size {
            return Err(TransportError::Rejected(format!(
                "file of {total} bytes exceeds the {} byte limit",
                self.max_size
            )));
        }

        let dir = self.outbox.join(chat.to_string());
        tokio::fs::create_dir_all(&dir).await.map_err(failed)?;
        let dest = dir.join(name);
        let partial = partial_path(&dest);

        let mut out = tokio::fs::File::create(&partial).await.map_err(failed)?;
        let mut guard = PartialFile::new(partial);
        let mut buf = vec![0u8; COPY_CHUNK];
        let mut sent = 0u64;
        on_progress(0, total);
        loop {
            let n = src.read(&mut buf).await.map_err(failed)?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n]).await.map_err(failed)?;
            sent += n as u64;
            on_progress(sent, total);
        }
        out.flush().await.map_err(failed)?;
        drop(out);

        tokio::fs::rename(&guard.path, &dest).await.map_err(failed)?;
        guard.disarm();
        debug!(dest = %dest.display(), bytes = sent, kind = ?attachment.kind, "part delivered");
        info!(%chat, caption = %attachment.caption, "sent");
        Ok(())
    }
}

impl Sink for DirectorySink {
    fn send<'a>(
        &'a self,
        chat: ChatRef,
        attachment: &'a Attachment,
        on_progress: &'a (dyn Fn(u64, u64) + Send + Sync),
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>> {
        Box::pin(self.deliver(chat, attachment, on_progress))
    }
}

/// Removes an unfinished `.partial` file unless disarmed.
struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed unfinished part"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove unfinished part"),
        }
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    dest.with_file_name(name)
}

fn failed(e: std::io::Error) -> TransportError {
    TransportError::Failed(e.to_string())
}
