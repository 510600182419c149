//! Decoded PCM audio plus codec and resampling helpers.

pub mod resample;
pub mod wav;

use crate::error::{FabulaError, Result};

/// A decoded block of PCM audio: one `Vec<f32>` per channel, samples in
/// [-1.0, 1.0].
///
/// Treated as immutable once produced — every processing stage allocates a
/// new buffer, so an `Arc<AudioBuffer>` can be read from multiple call sites
/// (waveform extraction, playback, rendering) without coordination.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    /// Build a buffer from per-channel sample data.
    ///
    /// # Errors
    /// `FabulaError::Decode` when there are no channels, the sample rate is
    /// zero, or the channels disagree on length.
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        if channels.is_empty() {
            return Err(FabulaError::Decode("buffer has no channels".into()));
        }
        if sample_rate == 0 {
            return Err(FabulaError::Decode("sample rate must be non-zero".into()));
        }
        let frames = channels[0].len();
        if channels.iter().any(|ch| ch.len() != frames) {
            return Err(FabulaError::Decode(
                "channels have mismatched lengths".into(),
            ));
        }
        Ok(Self {
            sample_rate,
            channels,
        })
    }

    /// Internal constructor for stage outputs whose shape is correct by
    /// construction.
    pub(crate) fn from_raw(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Single-channel convenience constructor.
    pub fn from_mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: vec![samples],
        }
    }

    /// An all-zero buffer of the given shape.
    pub fn silence(channel_count: usize, frames: usize, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: vec![vec![0.0; frames]; channel_count.max(1)],
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Frame count (samples per channel).
    pub fn frames(&self) -> usize {
        self.channels[0].len()
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_follows_frames_and_rate() {
        let buffer = AudioBuffer::silence(2, 44_100, 44_100);
        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.frames(), 44_100);
        assert!((buffer.duration_secs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn mismatched_channel_lengths_rejected() {
        let result = AudioBuffer::new(vec![vec![0.0; 10], vec![0.0; 11]], 48_000);
        assert!(result.is_err());
    }

    #[test]
    fn zero_rate_rejected() {
        assert!(AudioBuffer::new(vec![vec![0.0; 4]], 0).is_err());
        assert!(AudioBuffer::new(vec![], 48_000).is_err());
    }
}
