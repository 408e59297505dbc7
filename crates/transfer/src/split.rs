use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::naming::part_file_name;
use crate::{COPY_BUFFER_SIZE, SplitError};

/// Number of parts a file of `size` bytes is cut into with `max_part_size`.
///
/// Files that fit into one part (including empty files) count as one part.
pub fn part_count(size: u64, max_part_size: u64) -> u64 {
    if size <= max_part_size {
        1
    } else {
        size.div_ceil(max_part_size)
    }
}

/// Splits `path` into parts of at most `max_part_size` bytes.
///
/// - If the file fits into one part, returns `[path]` untouched (no copy).
/// - Otherwise writes `ceil(size / max_part_size)` part files next to the
///   source, named `<file>.<NNN>` with a 1-based zero-padded index, then
///   deletes the source. Every part except the last is exactly
///   `max_part_size` bytes; no part is ever empty.
///
/// A failure part-way leaves the parts written so far on disk; the caller
/// owns the directory and removes it.
pub fn split_file(path: &Path, max_part_size: u64) -> Result<Vec<PathBuf>, SplitError> {
    if max_part_size == 0 {
        return Err(SplitError::InvalidLimit(max_part_size));
    }

    let metadata = match std::fs::metadata(path) {
        Ok(m) if m.is_file() => m,
        Ok(_) => return Err(SplitError::SourceMissing(path.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SplitError::SourceMissing(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };

    let size = metadata.len();
    if size <= max_part_size {
        return Ok(vec![path.to_path_buf()]);
    }

    let count = part_count(size, max_part_size);
    let width = count.to_string().len().max(3);
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "part".into());

    let mut source = File::open(path)?;
    let mut parts = Vec::with_capacity(count as usize);

    for index in 1..=count {
        let expected = if index == count {
            size - max_part_size * (count - 1)
        } else {
            max_part_size
        };

        let part_path = parent.join(part_file_name(&file_name, index, width));
        let mut out = BufWriter::with_capacity(COPY_BUFFER_SIZE, File::create(&part_path)?);
        let copied = std::io::copy(&mut (&mut source).take(expected), &mut out)?;
        out.flush()?;

        if copied != expected {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("source shrank while splitting: part {index} got {copied} of {expected} bytes"),
            )
            .into());
        }

        debug!(part = index, parts = count, bytes = copied, "part written");
        parts.push(part_path);
    }

    drop(source);
    std::fs::remove_file(path)?;

    Ok(parts)
}

/// Concatenates `parts` in order into `out`. Returns the bytes written.
pub fn join_parts(parts: &[PathBuf], out: &Path) -> Result<u64, SplitError> {
    let mut writer = BufWriter::with_capacity(COPY_BUFFER_SIZE, File::create(out)?);
    let mut total = 0u64;

    for part in parts {
        let mut reader = match File::open(part) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SplitError::SourceMissing(part.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        total += std::io::copy(&mut reader, &mut writer)?;
    }

    writer.flush()?;
    Ok(total)
}
