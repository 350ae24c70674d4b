use serde::{Deserialize, Serialize};
use vidshrink_transcode::{PipelineSettings, TargetSettings, TranscodeSettings};

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Re-encode target for large videos
    #[serde(default)]
    pub target: TargetSettings,

    /// Driver loop tuning
    #[serde(default)]
    pub pipeline: PipelineSettings,

    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    pub fn transcode_settings(&self) -> TranscodeSettings {
        TranscodeSettings {
            target: self.target.clone(),
            pipeline: self.pipeline.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Replace an existing output file instead of refusing to start
    #[serde(default)]
    pub overwrite: bool,
}
