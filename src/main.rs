// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "camrec")]
#[command(about = "Record synchronized H.264 video and AAC audio into MP4")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a test pattern with microphone audio
    Record(cli::RecordArgs),

    /// List available audio input devices
    ListAudio,

    /// List installed H.264 and AAC encoders
    Encoders,

    /// Print the effective session parameters without recording
    Inspect {
        /// Preset JSON file
        #[arg(short, long)]
        preset: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=camrec=trace, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Record(args) => cli::record(args),
        Commands::ListAudio => cli::list_audio_devices(),
        Commands::Encoders => cli::list_encoders(),
        Commands::Inspect { preset } => cli::inspect(preset),
    }
}
