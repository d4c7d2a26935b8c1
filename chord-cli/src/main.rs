//! chordscribe - chord and key analysis from the command line
//!
//! Subcommands:
//! - `chordscribe notes <file>` - Analyze a transcribed note-event JSON file
//! - `chordscribe samples <file>` - Analyze raw little-endian mono f32 PCM
//! - `chordscribe listen --seconds N` - Capture from the microphone, then analyze
//!   (requires the `capture` feature)
//!
//! The analysis report is printed to stdout as JSON; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use chord_core::{AnalysisReport, AnalyzerSettings, ChordAnalyzer};

mod input;
#[cfg(feature = "capture")]
mod listen;

#[derive(Parser)]
#[command(name = "chordscribe")]
#[command(about = "Chord segmentation and key estimation for audio and note transcriptions")]
#[command(version)]
struct Cli {
    /// JSON settings file; fields it omits keep their defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Pretty-print the JSON report
    #[arg(long, global = true)]
    pretty: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze note events (a JSON array, or an object with a `notes` array)
    Notes {
        /// Path to the note-event JSON file
        file: PathBuf,
    },

    /// Analyze raw mono PCM stored as little-endian 32-bit floats
    Samples {
        /// Path to the raw sample file
        file: PathBuf,

        /// Sample rate of the file in Hz (overrides the settings file)
        #[arg(short, long)]
        sample_rate: Option<f32>,
    },

    /// Record from the default input device, then analyze the recording
    #[cfg(feature = "capture")]
    Listen {
        /// Recording length in seconds
        #[arg(short, long, default_value = "10")]
        seconds: f32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut settings = load_settings(cli.config.as_deref())?;

    let report = match cli.command {
        Commands::Notes { file } => {
            let notes = input::read_notes(&file)?;
            info!(path = %file.display(), notes = notes.len(), "loaded note events");
            ChordAnalyzer::new(settings)?.analyze_notes(&notes)?
        }
        Commands::Samples { file, sample_rate } => {
            if let Some(rate) = sample_rate {
                settings.cqt.sample_rate = rate;
            }
            let samples = input::read_samples(&file)?;
            info!(
                path = %file.display(),
                samples = samples.len(),
                sample_rate = settings.cqt.sample_rate,
                "loaded samples"
            );
            ChordAnalyzer::new(settings)?.analyze_samples(&samples)
        }
        #[cfg(feature = "capture")]
        Commands::Listen { seconds } => listen::record_and_analyze(settings, seconds)?,
    };

    print_report(&report, cli.pretty)
}

/// `RUST_LOG` wins when set; otherwise `-v` picks the level.
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_settings(path: Option<&Path>) -> Result<AnalyzerSettings> {
    let Some(path) = path else {
        return Ok(AnalyzerSettings::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading settings from {}", path.display()))?;
    let settings = parse_settings(&text)
        .with_context(|| format!("parsing settings from {}", path.display()))?;
    info!(path = %path.display(), "loaded settings");
    Ok(settings)
}

fn parse_settings(text: &str) -> Result<AnalyzerSettings> {
    let settings: AnalyzerSettings = serde_json::from_str(text)?;
    settings.validate()?;
    Ok(settings)
}

fn print_report(report: &AnalysisReport, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(report)?
    } else {
        serde_json::to_string(report)?
    };
    println!("{json}");
    Ok(())
}
