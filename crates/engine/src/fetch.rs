//! Fetch stage: stream a resolved resource into the task directory.

use std::path::Path;

use leech_protocol::{Progress, Source, Stage};
use leech_transfer::sanitize_file_name;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::ports::Resolver;
use crate::reporter::ProgressReporter;
use crate::types::FetchOutput;

/// Fetches `source` into `dir`, reporting every buffer to `reporter`.
///
/// The cancel token is checked before and after each buffer read; a
/// cancelled or failed fetch removes its partial output. Zero bytes of
/// output is [`FetchError::EmptyResult`].
pub async fn fetch(
    resolver: &dyn Resolver,
    source: &Source,
    dir: &Path,
    buffer_size: usize,
    cancel: &CancellationToken,
    reporter: &ProgressReporter,
) -> Result<FetchOutput, FetchError> {
    check_cancelled(cancel)?;

    let resolved = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        result = resolver.resolve(source) => result?,
    };

    let name = sanitize_file_name(&resolved.suggested_name);
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(&name);

    debug!(
        url = %source.url,
        name = %name,
        advertised = resolved.advertised_size,
        "resource resolved"
    );

    let mut reader = resolved.reader;
    let result = stream_to_file(
        &mut reader,
        &path,
        &name,
        resolved.advertised_size,
        buffer_size.max(1),
        cancel,
        reporter,
    )
    .await;

    match result {
        Ok(bytes) => {
            info!(name = %name, bytes, "fetch complete");
            Ok(FetchOutput { path, name, bytes })
        }
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_file(&path).await
                && rm.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = %path.display(), error = %rm, "failed to remove partial download");
            }
            Err(e)
        }
    }
}

async fn stream_to_file(
    reader: &mut (dyn AsyncRead + Send + Unpin),
    path: &Path,
    name: &str,
    total: u64,
    buffer_size: usize,
    cancel: &CancellationToken,
    reporter: &ProgressReporter,
) -> Result<u64, FetchError> {
    let file = tokio::fs::File::create(path).await?;
    let mut writer = BufWriter::with_capacity(buffer_size, file);
    let mut buf = vec![0u8; buffer_size];
    let mut downloaded: u64 = 0;

    loop {
        check_cancelled(cancel)?;

        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            read = reader.read(&mut buf) => {
                read.map_err(|e| FetchError::Network(e.to_string()))?
            }
        };

        check_cancelled(cancel)?;

        if n == 0 {
            break;
        }

        writer.write_all(&buf[..n]).await?;
        downloaded += n as u64;

        reporter.update(Progress {
            stage: Stage::Downloading,
            name: name.to_string(),
            current: downloaded,
            total,
        });
    }

    writer.flush().await?;
    drop(writer);

    let on_disk = tokio::fs::metadata(path).await?.len();
    if downloaded == 0 || on_disk == 0 {
        return Err(FetchError::EmptyResult);
    }

    Ok(downloaded)
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), FetchError> {
    if cancel.is_cancelled() {
        Err(FetchError::Cancelled)
    } else {
        Ok(())
    }
}
