//! # Audio Capture Module
//!
//! Live microphone input through CPAL (Cross-Platform Audio Library), cut
//! into the overlapping frames the constant-Q transform expects.
//!
//! Only compiled with the `capture` feature.
//!
//! ## Features
//! - Default input device selection
//! - Mono 32-bit float stream at the rate closest to the configured one
//! - Sliding `fft_size` frames emitted every `hop_size` samples

use anyhow::{Result, anyhow};
use cpal::SupportedStreamConfigRange;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Sender, TrySendError};
use tracing::{debug, error, info, warn};

use crate::config::CqtConfig;

/// Starts audio capture from the default input device.
///
/// This function:
/// 1. Selects the default audio input device
/// 2. Configures a mono f32 stream near `config.sample_rate`
/// 3. Sends a frame of `fft_size` samples for every `hop_size` new samples
///
/// # Arguments
/// * `sender` - Channel sender for streaming frames to the analysis side
/// * `config` - Frame geometry and requested sample rate
///
/// # Returns
/// * `Ok((stream, sample_rate))` - Audio stream handle and the actual sample rate
/// * `Err(e)` - Error if audio setup fails
pub fn start_audio_capture(
    sender: Sender<Vec<f32>>,
    config: &CqtConfig,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))?;

    let device_name = device.name()?;
    info!(device = %device_name, "using audio input device");

    let target_rate = config.sample_rate.round() as u32;
    let configs = device.supported_input_configs()?.collect::<Vec<_>>();
    let supported_config = find_supported_config(configs, target_rate)
        .ok_or_else(|| anyhow!("No suitable f32 input format found"))?;

    let rate = target_rate.clamp(
        supported_config.min_sample_rate().0,
        supported_config.max_sample_rate().0,
    );
    let stream_config: cpal::StreamConfig = supported_config
        .with_sample_rate(cpal::SampleRate(rate))
        .into();

    info!(sample_rate = rate, "selected sample rate");

    let mut framer = Framer::new(sender, config.fft_size, config.hop_size);

    let stream = device.build_input_stream(
        &stream_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| framer.push(data),
        |err| error!(%err, "audio stream error"),
        None,
    )?;

    stream.play()?;

    Ok((stream, rate))
}

/// Accumulates callback data and sends a frame of `fft_size` samples for
/// every `hop_size` new ones.
struct Framer {
    sender: Sender<Vec<f32>>,
    buffer: Vec<f32>,
    fft_size: usize,
    hop_size: usize,
    dropped: usize,
}

impl Framer {
    fn new(sender: Sender<Vec<f32>>, fft_size: usize, hop_size: usize) -> Self {
        Self {
            sender,
            buffer: Vec::with_capacity(fft_size * 2),
            fft_size,
            hop_size: hop_size.max(1),
            dropped: 0,
        }
    }

    fn push(&mut self, data: &[f32]) {
        self.buffer.extend_from_slice(data);

        // While we have enough data for a full frame, emit it and slide by one hop.
        while self.buffer.len() >= self.fft_size {
            match self.sender.try_send(self.buffer[..self.fft_size].to_vec()) {
                Ok(()) => {}
                // A dropped frame leaves a hole in the hop-spaced timeline.
                Err(TrySendError::Full(_)) => {
                    self.dropped += 1;
                    if self.dropped == 1 {
                        warn!("analysis is falling behind; dropping audio frames");
                    } else if self.dropped % 100 == 0 {
                        debug!(dropped = self.dropped, "audio frames dropped so far");
                    }
                }
                // The analysis side has stopped listening.
                Err(TrySendError::Disconnected(_)) => {}
            }
            self.buffer.drain(..self.hop_size.min(self.buffer.len()));
        }
    }
}

/// Finds the best supported audio configuration for the target sample rate.
///
/// Mono f32 configurations only; the one whose rate range lies closest to
/// `target_rate` wins.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.channels() == 1 && c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let (min, max) = (c.min_sample_rate().0, c.max_sample_rate().0);
            if (min..=max).contains(&target_rate) {
                0
            } else {
                min.abs_diff(target_rate).min(max.abs_diff(target_rate))
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use pretty_assertions::assert_eq;

    #[test]
    fn frames_slide_by_one_hop() {
        let (tx, rx) = bounded(16);
        let mut framer = Framer::new(tx, 4, 2);
        framer.push(&[0.0, 1.0, 2.0]);
        assert!(rx.try_recv().is_err());
        framer.push(&[3.0, 4.0, 5.0, 6.0]);
        assert_eq!(rx.try_recv().unwrap(), vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(rx.try_recv().unwrap(), vec![2.0, 3.0, 4.0, 5.0]);
        assert!(rx.try_recv().is_err());
        assert_eq!(framer.dropped, 0);
    }

    #[test]
    fn full_channel_drops_are_counted() {
        let (tx, rx) = bounded(1);
        let mut framer = Framer::new(tx, 4, 4);
        framer.push(&[0.0; 12]);
        assert_eq!(framer.dropped, 2);
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn disconnected_receiver_is_not_a_drop() {
        let (tx, rx) = bounded(1);
        drop(rx);
        let mut framer = Framer::new(tx, 4, 4);
        framer.push(&[0.0; 8]);
        assert_eq!(framer.dropped, 0);
        assert!(framer.buffer.is_empty());
    }
}
