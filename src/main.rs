mod cli;

use vidshrink::config;
use vidshrink_transcode::backend::Mp4Backend;
use vidshrink_transcode::{Progress, SourceHandle, TranscodeEngine, TranscodeManager, TranscodeOutcome, VideoPlan};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use std::sync::Arc;

async fn compress(input: &Path, output: &Path, config: config::Config) -> Result<TranscodeOutcome> {
    let manager = TranscodeManager::with_settings(Arc::new(Mp4Backend::new()), config.transcode_settings());
    let task = manager.compress(SourceHandle::file(input), output);

    // Log progress until the task ends
    let mut progress = task.progress();
    let progress_handle = tokio::spawn(async move {
        let mut last_logged = -1.0;
        while progress.changed().await.is_ok() {
            let current = *progress.borrow_and_update();
            match current {
                Progress::Unknown => tracing::info!("Progress unknown (source has no duration)"),
                Progress::Fraction(value) if value - last_logged >= 0.05 || value >= 1.0 => {
                    last_logged = value;
                    tracing::info!("Progress: {}", current);
                }
                Progress::Fraction(_) => {}
            }
        }
    });

    let cancel = task.cancellation_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, canceling transcode");
            cancel.cancel();
        }
    });

    let outcome = task.wait().await;
    ctrl_c.abort();
    let _ = progress_handle.await;
    Ok(outcome)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "vidshrink=trace,vidshrink_transcode=trace,vidshrink_media=debug".to_string()
        } else {
            "vidshrink=info,vidshrink_transcode=info,vidshrink_media=warn".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Compress { input, output } => {
            run_compress(&input, &output, cli.config.as_deref())
        }
        Commands::Probe { input, json } => probe_file(&input, cli.config.as_deref(), json),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
    }
}

fn run_compress(input: &Path, output: &Path, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    if !input.exists() {
        anyhow::bail!("Input file does not exist: {:?}", input);
    }
    if output.exists() && !config.output.overwrite {
        anyhow::bail!(
            "Output file already exists: {:?} (set output.overwrite = true to replace it)",
            output
        );
    }

    tracing::info!("Compressing {:?} -> {:?}", input, output);
    let rt = tokio::runtime::Runtime::new()?;
    let outcome = rt.block_on(compress(input, output, config))?;

    match outcome {
        TranscodeOutcome::Success => {
            println!("Compressed: {}", output.display());
            Ok(())
        }
        TranscodeOutcome::Canceled => anyhow::bail!("Transcode canceled"),
        TranscodeOutcome::Failed(failure) => {
            anyhow::bail!("Transcode failed ({}): {}", failure.reason, failure.message)
        }
    }
}

fn probe_file(input: &Path, config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    if !input.exists() {
        anyhow::bail!("File does not exist: {:?}", input);
    }

    let engine = TranscodeEngine::new(Arc::new(Mp4Backend::new()), config.transcode_settings());
    let (meta, plan) = engine
        .probe(&SourceHandle::file(input))
        .with_context(|| format!("Failed to probe {:?}", input))?;

    let decision = match &plan {
        VideoPlan::PassThrough => serde_json::json!({ "video": "pass-through" }),
        VideoPlan::Reencode(target) => serde_json::json!({ "video": "re-encode", "target": target }),
    };

    if json {
        let value = serde_json::json!({
            "file": input,
            "duration_us": meta.duration_us,
            "rotation": meta.rotation,
            "video": { "track": meta.video.index, "format": meta.video.format },
            "audio": { "track": meta.audio.index, "format": meta.audio.format },
            "ignored_tracks": meta.ignored_tracks,
            "decision": decision,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("File: {}", input.display());
    match meta.duration_us {
        Some(us) => {
            let secs = us / 1_000_000;
            println!("Duration: {:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60);
        }
        None => println!("Duration: unknown"),
    }
    println!("Rotation: {}°", meta.rotation);
    println!("\nVideo: [{}] {}", meta.video.index, meta.video.format);
    println!("Audio: [{}] {}", meta.audio.index, meta.audio.format);
    if meta.ignored_tracks > 0 {
        println!("Ignored tracks: {}", meta.ignored_tracks);
    }

    match plan {
        VideoPlan::PassThrough => println!("\nDecision: video is small enough, copy as-is"),
        VideoPlan::Reencode(target) => println!("\nDecision: re-encode video to {}", target),
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            print_config(&config);
        }
        None => match config::find_default_config() {
            Some(p) => validate_config(Some(&p))?,
            None => {
                println!("No config file specified, using defaults");
                print_config(&config::Config::default());
            }
        },
    }

    Ok(())
}

fn print_config(config: &config::Config) {
    let target = &config.target;
    println!(
        "  Target: {} {}x{} @ {} bps, {} fps, key frame every {}s",
        target.mime,
        target.width,
        target.height,
        target.bitrate,
        target.frame_rate,
        target.key_frame_interval_secs
    );
    println!(
        "  Pipeline: backoff {}ms, progress every {} iterations",
        config.pipeline.backoff_ms, config.pipeline.progress_interval
    );
    println!("  Validate output formats: {}", config.pipeline.validate_output_formats);
    println!("  Overwrite output: {}", config.output.overwrite);
}
