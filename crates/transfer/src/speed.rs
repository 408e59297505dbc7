use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Default averaging window.
const DEFAULT_WINDOW: Duration = Duration::from_secs(5);

/// Default cap on retained samples.
const DEFAULT_MAX_SAMPLES: usize = 100;

/// Sliding-window throughput estimator fed with cumulative byte counts.
///
/// Progress reports carry "bytes so far", so each sample is a position
/// rather than a delta. Speed is the position change between the oldest
/// and newest sample in the window divided by the time between them.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedSample {
    position: u64,
    timestamp: Instant,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(DEFAULT_MAX_SAMPLES).max(2),
                window_size: window_size.unwrap_or(DEFAULT_WINDOW),
            }),
        }
    }

    /// Records the cumulative `position` at the current instant.
    pub fn add_sample(&self, position: u64) {
        self.add_sample_at(position, Instant::now());
    }

    /// Records the cumulative `position` observed at `timestamp`.
    ///
    /// A position lower than the previous sample (a new part started)
    /// clears the window first.
    pub fn add_sample_at(&self, position: u64, timestamp: Instant) {
        let mut s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        if s.samples.last().is_some_and(|last| position < last.position) {
            s.samples.clear();
        }
        s.samples.push(SpeedSample { position, timestamp });

        if let Some(cutoff) = timestamp.checked_sub(s.window_size) {
            s.samples.retain(|sample| sample.timestamp >= cutoff);
        }

        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Average speed in bytes/second within the window, or `None` with
    /// fewer than two samples or no elapsed time.
    pub fn bytes_per_second(&self) -> Option<f64> {
        let s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let (first, last) = match (s.samples.first(), s.samples.last()) {
            (Some(f), Some(l)) if s.samples.len() >= 2 => (f, l),
            _ => return None,
        };

        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return None;
        }

        let moved = last.position.saturating_sub(first.position);
        Some(moved as f64 / elapsed.as_secs_f64())
    }

    /// Estimates the time left to move `remaining_bytes`.
    ///
    /// Returns `None` if the speed is unknown or zero.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second()?;
        if speed <= 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(remaining_bytes as f64 / speed).ok()
    }

    /// Clears all recorded samples.
    pub fn reset(&self) {
        let mut s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        s.samples.clear();
    }
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(None, None)
    }
}
