//! Progress reporting.

use serde::Serialize;
use std::fmt;

/// Progress of one transcode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Progress {
    /// The source has no usable duration, so no fraction can be computed.
    Unknown,
    /// Completed fraction in `[0, 1]`.
    Fraction(f64),
}

impl Progress {
    pub fn fraction(&self) -> Option<f64> {
        match self {
            Self::Fraction(value) => Some(*value),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("unknown"),
            Self::Fraction(value) => write!(f, "{:.1}%", value * 100.0),
        }
    }
}

/// Sender for reporting progress out of the pipeline.
pub struct ProgressSender {
    callback: Box<dyn Fn(Progress) + Send + Sync>,
}

impl ProgressSender {
    pub fn new(callback: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    /// A sender that discards all reports.
    pub fn noop() -> Self {
        Self {
            callback: Box::new(|_| {}),
        }
    }

    pub fn send(&self, progress: Progress) {
        (self.callback)(progress);
    }
}

impl fmt::Debug for ProgressSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressSender").finish_non_exhaustive()
    }
}

/// Clamps reported fractions to `[0, 1]` and never lets them go backwards.
#[derive(Debug, Default)]
pub(crate) struct ProgressTracker {
    last: Option<f64>,
}

impl ProgressTracker {
    /// The value to report for a new measurement.
    pub(crate) fn observe(&mut self, measured: f64) -> f64 {
        let clamped = if measured.is_nan() {
            0.0
        } else {
            measured.clamp(0.0, 1.0)
        };
        let value = self.last.map_or(clamped, |last| last.max(clamped));
        self.last = Some(value);
        value
    }
}
