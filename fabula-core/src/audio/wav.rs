//! WAV byte codec built on `hound`.
//!
//! Stored and exported narration is plain RIFF/WAVE: 44-byte header,
//! 16-bit little-endian PCM. Decoding additionally accepts 24/32-bit int
//! and 32-bit float sources, since upstream TTS services differ.

use std::io::Cursor;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::audio::AudioBuffer;
use crate::error::{FabulaError, Result};

/// Header-level facts about a WAV byte blob, read without decoding samples.
#[derive(Debug, Clone, Copy)]
pub struct WavInfo {
    pub channels: u16,
    pub sample_rate: u32,
    pub frames: u32,
}

impl WavInfo {
    pub fn duration_secs(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }
}

/// Read the header of `bytes` without touching sample data.
pub fn probe(bytes: &[u8]) -> Result<WavInfo> {
    let reader =
        WavReader::new(Cursor::new(bytes)).map_err(|e| FabulaError::Decode(e.to_string()))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 || spec.channels == 0 {
        return Err(FabulaError::Decode("degenerate WAV header".into()));
    }
    Ok(WavInfo {
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        frames: reader.duration(),
    })
}

/// Decode a WAV byte blob into planar f32 PCM.
pub fn decode(bytes: &[u8]) -> Result<AudioBuffer> {
    let mut reader =
        WavReader::new(Cursor::new(bytes)).map_err(|e| FabulaError::Decode(e.to_string()))?;
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(FabulaError::Decode("WAV declares zero channels".into()));
    }

    let channel_count = spec.channels as usize;
    let frames = reader.duration() as usize;
    let mut channels: Vec<Vec<f32>> = vec![Vec::with_capacity(frames); channel_count];

    match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => {
            for (i, sample) in reader.samples::<f32>().enumerate() {
                let sample = sample.map_err(|e| FabulaError::Decode(e.to_string()))?;
                channels[i % channel_count].push(sample);
            }
        }
        (SampleFormat::Int, bits) if (8..=32).contains(&bits) => {
            let scale = (1i64 << (bits - 1)) as f32;
            for (i, sample) in reader.samples::<i32>().enumerate() {
                let sample = sample.map_err(|e| FabulaError::Decode(e.to_string()))?;
                channels[i % channel_count].push(sample as f32 / scale);
            }
        }
        (format, bits) => {
            return Err(FabulaError::Decode(format!(
                "unsupported sample format: {format:?}/{bits}-bit"
            )))
        }
    }

    AudioBuffer::new(channels, spec.sample_rate)
}

/// Encode a buffer as 16-bit PCM WAV bytes.
pub fn encode(buffer: &AudioBuffer) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels: buffer.channel_count() as u16,
        sample_rate: buffer.sample_rate(),
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            WavWriter::new(&mut cursor, spec).map_err(|e| FabulaError::Other(e.into()))?;
        for frame in 0..buffer.frames() {
            for channel in 0..buffer.channel_count() {
                let sample = buffer.channel(channel)[frame].clamp(-1.0, 1.0);
                let quantized = (sample * i16::MAX as f32).round() as i16;
                writer
                    .write_sample(quantized)
                    .map_err(|e| FabulaError::Other(e.into()))?;
            }
        }
        writer
            .finalize()
            .map_err(|e| FabulaError::Other(e.into()))?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_buffer(frequency: f32, seconds: f32, sample_rate: u32) -> AudioBuffer {
        let frames = (seconds * sample_rate as f32) as usize;
        let samples: Vec<f32> = (0..frames)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.5
            })
            .collect();
        AudioBuffer::from_mono(samples, sample_rate)
    }

    #[test]
    fn encode_then_probe_reports_header_facts() {
        let buffer = sine_buffer(440.0, 0.25, 22_050);
        let bytes = encode(&buffer).unwrap();
        let info = probe(&bytes).unwrap();

        assert_eq!(info.channels, 1);
        assert_eq!(info.sample_rate, 22_050);
        assert_eq!(info.frames as usize, buffer.frames());
        assert!((info.duration_secs() - 0.25).abs() < 1e-3);
        // 44-byte RIFF header + 2 bytes per 16-bit sample
        assert_eq!(bytes.len(), 44 + buffer.frames() * 2);
    }

    #[test]
    fn decode_round_trips_within_quantization_error() {
        let buffer = sine_buffer(220.0, 0.1, 16_000);
        let decoded = decode(&encode(&buffer).unwrap()).unwrap();

        assert_eq!(decoded.channel_count(), 1);
        assert_eq!(decoded.frames(), buffer.frames());
        for (a, b) in buffer.channel(0).iter().zip(decoded.channel(0)) {
            assert!((a - b).abs() < 2.0 / i16::MAX as f32, "a={a} b={b}");
        }
    }

    #[test]
    fn garbage_bytes_fail_with_decode_error() {
        let err = decode(&[0u8; 16]).unwrap_err();
        assert!(matches!(err, FabulaError::Decode(_)));
    }

    #[test]
    fn stereo_interleaving_preserved() {
        let left = vec![0.5f32; 64];
        let right = vec![-0.5f32; 64];
        let buffer = AudioBuffer::new(vec![left, right], 48_000).unwrap();
        let decoded = decode(&encode(&buffer).unwrap()).unwrap();

        assert_eq!(decoded.channel_count(), 2);
        assert!(decoded.channel(0).iter().all(|s| *s > 0.49));
        assert!(decoded.channel(1).iter().all(|s| *s < -0.49));
    }
}
