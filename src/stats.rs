use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Attempt counter for the end-of-run summary. Only counts verifier
/// invocations made by this process, not resumed history.
pub struct Statistics {
    attempted: AtomicU64,
    start_time: AtomicU64,
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            attempted: AtomicU64::new(0),
            start_time: AtomicU64::new(unix_now()),
        }
    }

    pub fn increment_attempted(&self) {
        self.attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn attempted(&self) -> u64 {
        self.attempted.load(Ordering::Relaxed)
    }

    /// Seconds since this run started.
    pub fn elapsed(&self) -> f64 {
        let start = self.start_time.load(Ordering::Relaxed);
        unix_now().saturating_sub(start) as f64
    }

    /// Attempts per second for this run.
    pub fn rate(&self) -> f64 {
        let elapsed = self.elapsed();
        if elapsed > 0.0 {
            self.attempted() as f64 / elapsed
        } else {
            0.0
        }
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
