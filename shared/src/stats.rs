//! Rolling performance figures: tick rate, processing time and delivery latency.
//!
//! Messages carry the sender's wall-clock time in seconds since the Unix
//! epoch. The receiver subtracts it from its own clock on arrival, so
//! delivery figures are only meaningful when both clocks agree.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

/// Samples kept by default, and how many new samples make a report due.
pub const DEFAULT_WINDOW: usize = 100;

/// Mean over the most recent `window` samples
#[derive(Debug, Clone)]
pub struct RollingAverage {
    values: VecDeque<f64>,
    window: usize,
    since_report: usize,
}

impl RollingAverage {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            values: VecDeque::with_capacity(window),
            window,
            since_report: 0,
        }
    }

    pub fn push(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        if self.values.len() == self.window {
            self.values.pop_front();
        }
        self.values.push_back(value);
        self.since_report += 1;
    }

    pub fn average(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the average once a full window of new samples has arrived
    /// since the last report, and starts counting again.
    pub fn report(&mut self) -> Option<f64> {
        if self.since_report < self.window {
            return None;
        }
        self.since_report = 0;
        self.average()
    }
}

impl Default for RollingAverage {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

/// Current wall-clock time as seconds since the Unix epoch.
pub fn timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}

/// Milliseconds between `sent` and now. Clock skew never yields a negative value.
pub fn latency_ms(sent: f64) -> f64 {
    ((timestamp() - sent) * 1000.0).max(0.0)
}
