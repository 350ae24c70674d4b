//! Pipeline settings.

use crate::policy::TargetSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Everything tunable about one transcode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeSettings {
    pub target: TargetSettings,
    pub pipeline: PipelineSettings,
}

/// Driver loop tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Sleep after an iteration in which no transcoder made progress.
    pub backoff_ms: u64,
    /// Report progress every this many iterations.
    pub progress_interval: u64,
    /// Require Baseline AVC video and AAC audio before the muxer starts.
    pub validate_output_formats: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            backoff_ms: 10,
            progress_interval: 100,
            validate_output_formats: false,
        }
    }
}

impl PipelineSettings {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}
