//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! ## Design
//!
//! Narration is stored at whatever rate the TTS service produced (commonly
//! 22.05 or 24 kHz) while output devices usually run at 44.1/48 kHz.
//! `RateConverter` bridges that gap on a non-realtime thread, where
//! allocation is allowed. When the rates already match it is a zero-copy
//! passthrough — no rubato session is created at all.
//!
//! Streaming callers feed `process` repeatedly; whole-buffer callers use
//! [`resample_buffer`], which also drains the converter's tail.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::audio::AudioBuffer;
use crate::error::{FabulaError, Result};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when source rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Holds partial input chunks between calls.
    input_buf: Vec<f32>,
    /// Input frames rubato expects per process call.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
    /// target / source rate.
    ratio: f64,
    frames_in: usize,
    frames_out: usize,
}

impl RateConverter {
    /// Create a converter from `source_rate` to `target_rate` Hz, consuming
    /// `chunk_size` input frames per rubato call.
    ///
    /// # Errors
    /// `FabulaError::AudioEngine` if rubato fails to initialise.
    pub fn new(source_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        let ratio = target_rate as f64 / source_rate as f64;

        if source_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
                ratio,
                frames_in: 0,
                frames_out: 0,
            });
        }

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio — no dynamic adjustment
            PolynomialDegree::Cubic,
            chunk_size,
            1, // mono
        )
        .map_err(|e| FabulaError::AudioEngine(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf,
            ratio,
            frames_in: 0,
            frames_out: 0,
        })
    }

    /// Process incoming samples, returning converted output (may be empty).
    ///
    /// Input accumulates internally until a full `chunk_size` block is
    /// available; any remainder is kept for the next call. In passthrough
    /// mode input is returned directly.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        self.frames_in += samples.len();

        let Some(ref mut resampler) = self.resampler else {
            self.frames_out += samples.len();
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();
        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];
            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }
            self.input_buf.drain(..self.chunk_size);
        }

        self.frames_out += result.len();
        result
    }

    /// Drain the converter: pad the pending tail with silence, run it through
    /// rubato, and return output truncated so that total output matches
    /// `round(total_input * ratio)`.
    pub fn finish(&mut self) -> Vec<f32> {
        if self.resampler.is_none() {
            return Vec::new();
        }

        let expected_total = (self.frames_in as f64 * self.ratio).round() as usize;
        let mut remaining = expected_total.saturating_sub(self.frames_out);
        if remaining == 0 {
            self.input_buf.clear();
            return Vec::new();
        }

        let mut result = Vec::new();
        // Rubato carries a few frames of latency, so one padded chunk may not
        // surface the whole tail. Bounded silent chunks flush the rest.
        for _ in 0..8 {
            let pad = self.chunk_size.saturating_sub(self.input_buf.len());
            let silence = vec![0f32; pad];
            let produced = self.process(&silence);
            // process() counted the padding as real input; undo that.
            self.frames_in -= pad;
            result.extend_from_slice(&produced);
            if result.len() >= remaining {
                break;
            }
        }

        remaining = remaining.min(result.len());
        result.truncate(remaining);
        self.input_buf.clear();
        result
    }

    /// Returns `true` when source rate == target rate (no conversion occurs).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

/// Convert a whole decoded buffer to `target_rate`, channel by channel.
pub fn resample_buffer(buffer: &AudioBuffer, target_rate: u32) -> Result<AudioBuffer> {
    if buffer.sample_rate() == target_rate {
        return Ok(buffer.clone());
    }

    const CHUNK: usize = 1024;
    let mut channels = Vec::with_capacity(buffer.channel_count());
    for index in 0..buffer.channel_count() {
        let mut converter = RateConverter::new(buffer.sample_rate(), target_rate, CHUNK)?;
        let mut samples = converter.process(buffer.channel(index));
        samples.extend(converter.finish());
        channels.push(samples);
    }

    // Per-channel streams can drift by a frame; trim to the shortest.
    let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
    for channel in &mut channels {
        channel.truncate(frames);
    }
    AudioBuffer::new(channels, target_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(44_100, 44_100, 1024).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..500).map(|i| i as f32 * 0.001).collect();
        let out = rc.process(&samples);
        assert_eq!(out, samples);
        assert!(rc.finish().is_empty());
    }

    #[test]
    fn partial_chunk_returns_empty_until_filled() {
        let mut rc = RateConverter::new(22_050, 44_100, 1024).unwrap();
        assert!(rc.process(&vec![0.0f32; 600]).is_empty());
        assert!(!rc.process(&vec![0.0f32; 600]).is_empty());
    }

    #[test]
    fn resample_buffer_scales_frame_count() {
        let buffer = AudioBuffer::silence(1, 22_050, 22_050);
        let out = resample_buffer(&buffer, 44_100).unwrap();
        assert_eq!(out.sample_rate(), 44_100);
        let expected = 44_100i64;
        assert!(
            (out.frames() as i64 - expected).abs() <= 32,
            "frames={} expected≈{}",
            out.frames(),
            expected
        );
    }

    #[test]
    fn resample_buffer_same_rate_is_clone() {
        let buffer = AudioBuffer::from_mono(vec![0.25; 256], 48_000);
        let out = resample_buffer(&buffer, 48_000).unwrap();
        assert_eq!(out, buffer);
    }

    #[test]
    fn stereo_channels_stay_aligned() {
        let buffer = AudioBuffer::new(vec![vec![0.5; 4096], vec![-0.5; 4096]], 48_000).unwrap();
        let out = resample_buffer(&buffer, 16_000).unwrap();
        assert_eq!(out.channel_count(), 2);
        assert_eq!(out.channel(0).len(), out.channel(1).len());
    }
}
