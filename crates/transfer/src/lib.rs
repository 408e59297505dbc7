//! File-level building blocks for relaying large downloads.
//!
//! - [`split_file`] cuts a finished download into size-bounded parts.
//! - [`join_parts`] concatenates parts back into the original file.
//! - [`render_progress`] and friends turn progress samples into the text
//!   shown in the status message.
//! - [`SpeedCalculator`] estimates throughput and ETA.

mod format;
mod naming;
mod speed;
mod split;

use std::path::PathBuf;

pub use format::{format_eta, human_bytes, progress_bar, render_progress};
pub use naming::{
    MAX_CAPTION_NAME_LEN, MAX_FILE_NAME_BYTES, part_file_name, sanitize_file_name, truncate_name,
    truncate_name_bytes,
};
pub use speed::SpeedCalculator;
pub use split::{join_parts, part_count, split_file};

/// Largest part the destination accepts: 1,900 MiB.
pub const DEFAULT_MAX_PART_SIZE: u64 = 1900 * 1024 * 1024;

/// Buffer size used when copying part windows to disk.
pub const COPY_BUFFER_SIZE: usize = 256 * 1024;

/// Errors produced while splitting or joining files.
#[derive(Debug, thiserror::Error)]
pub enum SplitError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source file missing: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("invalid part size limit: {0}")]
    InvalidLimit(u64),
}
