use std::time::Duration;

use leech_protocol::Progress;

const BAR_CELLS: usize = 20;
const FILLED: char = '█';
const EMPTY: char = '░';

/// Formats a byte count with base-1024 units and two decimals.
///
/// `0` renders as `0B`; everything else as e.g. `1.50MB`.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    if bytes == 0 {
        return "0B".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2}{}", UNITS[unit])
}

/// Renders a 20-cell bar with one filled cell per 5 %.
///
/// An unknown percentage renders an empty bar.
pub fn progress_bar(percentage: Option<f64>) -> String {
    let pct = percentage.unwrap_or(0.0).clamp(0.0, 100.0);
    let filled = ((pct / 5.0).floor() as usize).min(BAR_CELLS);

    let mut bar = String::with_capacity(BAR_CELLS * 3);
    bar.extend(std::iter::repeat_n(FILLED, filled));
    bar.extend(std::iter::repeat_n(EMPTY, BAR_CELLS - filled));
    bar
}

/// Formats a remaining-time estimate as `1h 02m 03s`, `4m 05s` or `6s`.
pub fn format_eta(eta: Option<Duration>) -> String {
    let Some(eta) = eta else {
        return "N/A".to_string();
    };

    let secs = eta.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m:02}m {s:02}s")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}

/// Renders the text of a status message for one progress sample.
///
/// ```text
/// Downloading
/// movie.mkv
/// ██████████░░░░░░░░░░ 50.0%
/// 1.00GB / 2.00GB
/// Speed: 10.00MB/s • ETA: 1m 42s
/// ```
pub fn render_progress(progress: &Progress, speed: Option<f64>, eta: Option<Duration>) -> String {
    let pct = progress.percentage();
    let pct_text = match pct {
        Some(p) => format!("{p:.1}%"),
        None => "?%".to_string(),
    };
    let total_text = if progress.total == 0 {
        "?".to_string()
    } else {
        human_bytes(progress.total)
    };
    let speed_text = match speed {
        Some(bps) if bps > 0.0 => format!("{}/s", human_bytes(bps as u64)),
        _ => "N/A".to_string(),
    };

    format!(
        "{}\n{}\n{} {}\n{} / {}\nSpeed: {} • ETA: {}",
        progress.stage,
        progress.name,
        progress_bar(pct),
        pct_text,
        human_bytes(progress.current),
        total_text,
        speed_text,
        format_eta(eta),
    )
}
