use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vidshrink")]
#[command(author, version, about = "Shrink videos for sharing")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compress a video: re-encode large video, copy audio
    Compress {
        /// Source MP4 file
        #[arg(required = true)]
        input: PathBuf,

        /// Where to write the result
        #[arg(required = true)]
        output: PathBuf,
    },

    /// Show tracks, metadata and what compress would do
    Probe {
        /// File to probe
        #[arg(required = true)]
        input: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },
}
