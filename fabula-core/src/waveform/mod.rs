//! Fixed-width RMS amplitude envelopes for waveform rendering.
//!
//! The editor draws one vertical bar per envelope element, so the output
//! length must be exactly what the view asked for. Envelopes are derived on
//! demand and cached only by the view — never persisted.

use crate::audio::AudioBuffer;
use crate::error::{FabulaError, Result};

/// Downsample the first channel of `buffer` into `target_width` RMS buckets.
///
/// The channel is partitioned into `target_width` contiguous blocks of
/// `floor(frames / target_width)` samples; each output element is
/// `sqrt(mean(sample²))` over its block. Pure and deterministic — the same
/// buffer always yields the same envelope.
///
/// # Errors
/// `FabulaError::Validation` when `target_width` is zero, the buffer is
/// empty, or the buffer is shorter than `target_width`.
pub fn extract(buffer: &AudioBuffer, target_width: usize) -> Result<Vec<f32>> {
    if target_width == 0 {
        return Err(FabulaError::Validation(
            "waveform width must be positive".into(),
        ));
    }
    if buffer.is_empty() {
        return Err(FabulaError::Validation(
            "cannot extract a waveform from an empty buffer".into(),
        ));
    }

    let samples = buffer.channel(0);
    let block = samples.len() / target_width;
    if block == 0 {
        return Err(FabulaError::Validation(format!(
            "buffer too short: {} frames for width {target_width}",
            samples.len()
        )));
    }

    let mut envelope = Vec::with_capacity(target_width);
    for i in 0..target_width {
        let start = i * block;
        let chunk = &samples[start..start + block];
        let sum_sq: f32 = chunk.iter().map(|s| s * s).sum();
        envelope.push((sum_sq / block as f32).sqrt());
    }
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn envelope_has_exactly_the_requested_width() {
        let buffer = AudioBuffer::silence(1, 44_100, 44_100);
        assert_eq!(extract(&buffer, 200).unwrap().len(), 200);
        assert_eq!(extract(&buffer, 1).unwrap().len(), 1);
        assert_eq!(extract(&buffer, 999).unwrap().len(), 999);
    }

    #[test]
    fn constant_amplitude_yields_constant_envelope() {
        let buffer = AudioBuffer::from_mono(vec![0.25f32; 10_000], 44_100);
        let envelope = extract(&buffer, 100).unwrap();
        for value in envelope {
            assert_abs_diff_eq!(value, 0.25, epsilon = 1e-6);
        }
    }

    #[test]
    fn square_wave_rms_matches_amplitude() {
        let samples: Vec<f32> = (0..8_000)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        let buffer = AudioBuffer::from_mono(samples, 16_000);
        let envelope = extract(&buffer, 40).unwrap();
        for value in envelope {
            assert_abs_diff_eq!(value, 0.5, epsilon = 1e-6);
        }
    }

    #[test]
    fn loud_region_shows_up_in_the_right_bucket() {
        let mut samples = vec![0.0f32; 1_000];
        for sample in &mut samples[500..600] {
            *sample = 0.9;
        }
        let buffer = AudioBuffer::from_mono(samples, 16_000);
        let envelope = extract(&buffer, 10).unwrap();
        assert!(envelope[5] > 0.5);
        assert_abs_diff_eq!(envelope[0], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn invalid_arguments_fail_fast() {
        let buffer = AudioBuffer::silence(1, 1_000, 44_100);
        assert!(matches!(
            extract(&buffer, 0),
            Err(FabulaError::Validation(_))
        ));

        let empty = AudioBuffer::silence(1, 0, 44_100);
        assert!(matches!(
            extract(&empty, 100),
            Err(FabulaError::Validation(_))
        ));

        // more buckets than frames → zero-sample blocks
        assert!(matches!(
            extract(&buffer, 2_000),
            Err(FabulaError::Validation(_))
        ));
    }

    #[test]
    fn repeated_extraction_is_stable() {
        let samples: Vec<f32> = (0..44_100).map(|i| (i as f32 * 0.013).sin() * 0.6).collect();
        let buffer = AudioBuffer::from_mono(samples, 44_100);
        assert_eq!(extract(&buffer, 200).unwrap(), extract(&buffer, 200).unwrap());
    }
}
