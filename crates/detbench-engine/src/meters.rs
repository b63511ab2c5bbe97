//! Smoothed training meters
//!
//! Loss values and iteration timings are noisy, so the log line shows a
//! windowed median next to the global average: `name: median (global_avg)`.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::fmt;

const WINDOW_SIZE: usize = 20;

/// A series of values tracked over a sliding window plus a global total
#[derive(Debug, Clone)]
pub struct SmoothedValue {
    window: VecDeque<f64>,
    total: f64,
    count: usize,
}

impl Default for SmoothedValue {
    fn default() -> Self {
        Self::new()
    }
}

impl SmoothedValue {
    pub fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(WINDOW_SIZE),
            total: 0.0,
            count: 0,
        }
    }

    pub fn update(&mut self, value: f64) {
        if self.window.len() == WINDOW_SIZE {
            self.window.pop_front();
        }
        self.window.push_back(value);
        self.total += value;
        self.count += 1;
    }

    /// Median of the current window
    pub fn median(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let mut values: Vec<f64> = self.window.iter().copied().collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        values[values.len() / 2]
    }

    /// Mean of the current window
    pub fn avg(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().sum::<f64>() / self.window.len() as f64
    }

    /// Mean over every value ever recorded
    pub fn global_avg(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.total / self.count as f64
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

/// Named collection of smoothed meters with a joined display
#[derive(Debug, Clone)]
pub struct MetricLogger {
    delimiter: String,
    meters: BTreeMap<String, SmoothedValue>,
}

impl Default for MetricLogger {
    fn default() -> Self {
        Self::new("  ")
    }
}

impl MetricLogger {
    pub fn new(delimiter: &str) -> Self {
        Self {
            delimiter: delimiter.to_string(),
            meters: BTreeMap::new(),
        }
    }

    pub fn update(&mut self, name: &str, value: f64) {
        self.meters.entry(name.to_string()).or_default().update(value);
    }

    /// Fold a loss map into the meters; keys are visited in sorted order so
    /// the rendered line is deterministic.
    pub fn update_losses(&mut self, losses: &BTreeMap<String, f64>) {
        let total: f64 = losses.values().sum();
        self.update("loss", total);
        for (name, value) in losses {
            self.update(name, *value);
        }
    }

    pub fn get(&self, name: &str) -> Option<&SmoothedValue> {
        self.meters.get(name)
    }
}

impl fmt::Display for MetricLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .meters
            .iter()
            .map(|(name, meter)| {
                format!("{}: {:.4} ({:.4})", name, meter.median(), meter.global_avg())
            })
            .collect();
        write!(f, "{}", parts.join(&self.delimiter))
    }
}
