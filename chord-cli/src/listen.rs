//! Microphone recording for the `listen` subcommand.
//!
//! Frames arrive from the capture callback over a crossbeam channel until the
//! requested duration has been collected, then the whole take is analyzed.

use anyhow::{Result, bail};
use cpal::traits::StreamTrait;
use crossbeam_channel::{RecvTimeoutError, bounded};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use chord_core::{AnalysisReport, AnalyzerSettings, ChordAnalyzer, audio};

/// How long to wait for the first frames before assuming the device is dead.
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

pub fn record_and_analyze(mut settings: AnalyzerSettings, seconds: f32) -> Result<AnalysisReport> {
    if !(seconds.is_finite() && seconds > 0.0) {
        bail!("recording length must be positive, got {seconds}");
    }
    settings.validate()?;

    let (frame_tx, frame_rx) = bounded::<Vec<f32>>(256);
    let (stream, sample_rate) = audio::start_audio_capture(frame_tx, &settings.cqt)?;
    if sample_rate as f32 != settings.cqt.sample_rate {
        warn!(
            requested = settings.cqt.sample_rate,
            actual = sample_rate,
            "device does not support the configured sample rate"
        );
        settings.cqt.sample_rate = sample_rate as f32;
    }

    let wanted = (seconds * sample_rate as f32 / settings.cqt.hop_size as f32).ceil() as usize;
    info!(seconds, frames = wanted, "recording");

    let deadline = Instant::now() + Duration::from_secs_f32(seconds) + STALL_TIMEOUT;
    let mut frames: Vec<Vec<f32>> = Vec::with_capacity(wanted);
    while frames.len() < wanted {
        let timeout = deadline.saturating_duration_since(Instant::now());
        match frame_rx.recv_timeout(timeout) {
            Ok(frame) => frames.push(frame),
            Err(RecvTimeoutError::Timeout) => {
                warn!(received = frames.len(), wanted, "capture stalled; analyzing what arrived");
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    stream.pause()?;
    drop(stream);

    info!(frames = frames.len(), "recording finished");
    Ok(ChordAnalyzer::new(settings)?.analyze_frames(&frames))
}
