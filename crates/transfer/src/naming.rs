use std::path::Path;

/// Longest part name used in a caption before it is truncated.
pub const MAX_CAPTION_NAME_LEN: usize = 150;

/// Longest on-disk name in bytes. Leaves room for a `.NNN` part suffix
/// under the common 255-byte file name limit.
pub const MAX_FILE_NAME_BYTES: usize = 240;

/// Name used when a resolver suggests nothing usable.
const FALLBACK_NAME: &str = "download.bin";

/// Turns a resolver-suggested name into a safe single path component.
///
/// Removes:
/// - Path separators (`/`, `\`) so the name cannot escape its directory
/// - Characters chat clients reject (`* ? : " < > |`)
/// - Control characters
///
/// Leading/trailing whitespace is trimmed; empty results, `.` and `..`
/// fall back to `download.bin`. Names longer than [`MAX_FILE_NAME_BYTES`]
/// are shortened, keeping the extension.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|'))
        .filter(|c| !c.is_control())
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return FALLBACK_NAME.to_string();
    }
    truncate_name_bytes(cleaned, MAX_FILE_NAME_BYTES)
}

/// Truncates `name` to at most `max` bytes on a char boundary, keeping its
/// extension when the extension itself fits.
pub fn truncate_name_bytes(name: &str, max: usize) -> String {
    if name.len() <= max {
        return name.to_string();
    }

    let ext = Path::new(name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    if ext.len() >= max {
        return floor_to_char_boundary(name, max).to_string();
    }

    let stem = floor_to_char_boundary(name, max - ext.len()).trim_end();
    format!("{stem}{ext}")
}

fn floor_to_char_boundary(s: &str, max: usize) -> &str {
    let mut end = max.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Name of the `index`-th part (1-based) of `file_name`.
///
/// The index is zero-padded to `width` digits so lexical order equals
/// numeric order: `movie.mkv.001`, `movie.mkv.002`, ...
pub fn part_file_name(file_name: &str, index: u64, width: usize) -> String {
    format!("{file_name}.{index:0width$}")
}

/// Truncates `name` to at most `max` characters, keeping its extension.
pub fn truncate_name(name: &str, max: usize) -> String {
    if name.chars().count() <= max {
        return name.to_string();
    }

    let ext = Path::new(name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let ext_len = ext.chars().count();
    if ext_len >= max {
        return name.chars().take(max).collect();
    }

    let stem: String = name.chars().take(max - ext_len).collect();
    format!("{stem}{ext}")
}
