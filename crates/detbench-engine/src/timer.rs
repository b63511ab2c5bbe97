//! Wall-clock timing helpers

use std::time::Instant;

/// Accumulating tic/toc timer
#[derive(Debug, Default)]
pub struct Timer {
    start: Option<Instant>,
    total_secs: f64,
    calls: usize,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tic(&mut self) {
        self.start = Some(Instant::now());
    }

    /// Stop the current measurement and return its duration in seconds.
    /// A toc without a matching tic contributes nothing.
    pub fn toc(&mut self) -> f64 {
        match self.start.take() {
            Some(start) => {
                let elapsed = start.elapsed().as_secs_f64();
                self.total_secs += elapsed;
                self.calls += 1;
                elapsed
            }
            None => 0.0,
        }
    }

    pub fn total_secs(&self) -> f64 {
        self.total_secs
    }

    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn avg_secs(&self) -> f64 {
        if self.calls == 0 {
            return 0.0;
        }
        self.total_secs / self.calls as f64
    }
}

/// Format a duration in seconds as `H:MM:SS` (hours unpadded)
pub fn format_time(secs: f64) -> String {
    let total = secs.max(0.0) as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{hours}:{minutes:02}:{seconds:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tic_toc_accumulates() {
        let mut timer = Timer::new();
        timer.tic();
        let first = timer.toc();
        timer.tic();
        timer.toc();
        assert!(first >= 0.0);
        assert_eq!(timer.calls(), 2);
        assert!(timer.total_secs() >= first);
    }

    #[test]
    fn test_toc_without_tic_is_noop() {
        let mut timer = Timer::new();
        assert_eq!(timer.toc(), 0.0);
        assert_eq!(timer.calls(), 0);
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0.0), "0:00:00");
        assert_eq!(format_time(59.9), "0:00:59");
        assert_eq!(format_time(3661.0), "1:01:01");
        assert_eq!(format_time(86400.0 + 7200.0), "26:00:00");
    }
}
