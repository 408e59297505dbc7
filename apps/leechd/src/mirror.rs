//! JSON-lines task mirror.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use leech_engine::{MirrorRecord, TaskMirror};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Appends one JSON object per record to a file.
pub struct JsonlMirror {
    path: PathBuf,
    // Serializes appends so lines from concurrent tasks never interleave.
    lock: Mutex<()>,
}

impl JsonlMirror {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn append(&self, record: MirrorRecord) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await
    }
}

impl TaskMirror for JsonlMirror {
    fn record(
        &self,
        record: MirrorRecord,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<()>> + Send + '_>> {
        Box::pin(self.append(record))
    }
}
