//! Configuration loading tests

use assert_matches::assert_matches;
use std::fs;
use tempfile::tempdir;
use vidshrink::config::{self, Config};
use vidshrink_transcode::{PipelineSettings, TargetSettings};

#[test]
fn test_empty_config_uses_defaults() {
    let config = config::parse_config("").unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.target.width, 640);
    assert_eq!(config.target.height, 480);
    assert_eq!(config.target.bitrate, 500_000);
    assert_eq!(config.pipeline.backoff_ms, 10);
    assert_eq!(config.pipeline.progress_interval, 100);
    assert!(!config.output.overwrite);
}

#[test]
fn test_partial_sections() {
    let config = config::parse_config(
        r#"
[target]
bitrate = 800000

[pipeline]
backoff_ms = 2
validate_output_formats = true

[output]
overwrite = true
"#,
    )
    .unwrap();

    assert_matches!(
        config.target,
        TargetSettings {
            bitrate: 800_000,
            frame_rate: 30,
            width: 640,
            ..
        }
    );
    assert_matches!(
        config.pipeline,
        PipelineSettings {
            backoff_ms: 2,
            progress_interval: 100,
            validate_output_formats: true,
        }
    );
    assert!(config.output.overwrite);

    let settings = config.transcode_settings();
    assert_eq!(settings.target.bitrate, 800_000);
    assert_eq!(settings.pipeline.backoff_ms, 2);
}

#[test]
fn test_rejects_invalid_values() {
    for toml in [
        "[target]\nwidth = 0",
        "[target]\nbitrate = 0",
        "[target]\nframe_rate = 0",
        "[target]\nwidth = 480\nheight = 640",
        "[target]\nmime = \"audio/aac\"",
        "[pipeline]\nprogress_interval = 0",
    ] {
        assert_matches!(config::parse_config(toml), Err(_), "accepted: {toml}");
    }
}

#[test]
fn test_rejects_malformed_toml() {
    let err = config::parse_config("[target\nwidth = 1").unwrap_err();
    assert!(err.to_string().contains("TOML"));
}

#[test]
fn test_load_from_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vidshrink.toml");
    fs::write(&path, "[target]\nwidth = 854\n").unwrap();

    let config = config::load_config(&path).unwrap();
    assert_eq!(config.target.width, 854);

    let explicit = config::load_config_or_default(Some(&path)).unwrap();
    assert_eq!(explicit, config);
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempdir().unwrap();
    let err = config::load_config(&dir.path().join("nope.toml")).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}
