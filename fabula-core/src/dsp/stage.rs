//! Individual DSP transforms as a tagged union.
//!
//! The engine lowers a `ProcessingChain` into an ordered `Vec<Stage>` and
//! folds [`Stage::apply`] over it. Every variant produces a new buffer of
//! identical shape, which is what makes the chain's length invariant hold
//! by construction — and makes each stage unit-testable on its own.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::audio::AudioBuffer;
use crate::dsp::biquad::Biquad;
use crate::dsp::dynamics::{db_to_lin, lin_to_db, Compressor};
use crate::dsp::reverb;

/// De-esser wet path: sibilance band center and width.
const DE_ESS_FREQUENCY: f32 = 6_000.0;
const DE_ESS_Q: f32 = 2.0;
/// Emphasis applied to the wet path before its compressor keys on it.
const DE_ESS_EMPHASIS_DB: f32 = 6.0;

/// Hard cap on normalization gain; keeps a near-silent source from being
/// blown up into pure noise.
const MAX_NORMALIZE_GAIN_DB: f32 = 40.0;

pub(crate) enum Stage {
    HighPass {
        frequency: f32,
        q: f32,
    },
    DeClick {
        intensity: f32,
    },
    DeEss {
        threshold_db: f32,
    },
    LowPass {
        frequency: f32,
        q: f32,
    },
    EqBand {
        frequency: f32,
        gain_db: f32,
        q: f32,
    },
    Compress {
        threshold_db: f32,
        ratio: f32,
        attack_ms: f32,
        release_ms: f32,
    },
    Limit {
        threshold_db: f32,
        release_ms: f32,
    },
    Reverb {
        impulse: Arc<Vec<f32>>,
        wet_level: f32,
    },
    StereoWidth {
        width: f32,
    },
    Normalize {
        target_lufs: f32,
    },
    PeakLimit {
        ceiling: f32,
    },
    Dither {
        bit_depth: u16,
        seed: u64,
    },
}

impl Stage {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Stage::HighPass { .. } => "high_pass",
            Stage::DeClick { .. } => "de_click",
            Stage::DeEss { .. } => "de_esser",
            Stage::LowPass { .. } => "low_pass",
            Stage::EqBand { .. } => "eq_band",
            Stage::Compress { .. } => "compressor",
            Stage::Limit { .. } => "limiter",
            Stage::Reverb { .. } => "reverb",
            Stage::StereoWidth { .. } => "stereo_width",
            Stage::Normalize { .. } => "normalize",
            Stage::PeakLimit { .. } => "peak_limit",
            Stage::Dither { .. } => "dither",
        }
    }

    /// Render this stage into a fresh buffer of identical shape.
    pub(crate) fn apply(&self, input: &AudioBuffer) -> AudioBuffer {
        let sample_rate = input.sample_rate() as f32;
        match self {
            Stage::HighPass { frequency, q } => map_channels(input, |channel| {
                let mut samples = channel.to_vec();
                Biquad::high_pass(sample_rate, *frequency, *q).process(&mut samples);
                samples
            }),

            Stage::LowPass { frequency, q } => map_channels(input, |channel| {
                let mut samples = channel.to_vec();
                Biquad::low_pass(sample_rate, *frequency, *q).process(&mut samples);
                samples
            }),

            Stage::EqBand {
                frequency,
                gain_db,
                q,
            } => map_channels(input, |channel| {
                let mut samples = channel.to_vec();
                Biquad::peaking(sample_rate, *frequency, *q, *gain_db).process(&mut samples);
                samples
            }),

            Stage::DeClick { intensity } => {
                // Slew limiter: the stronger the intensity, the smaller the
                // per-sample jump that survives.
                let max_delta = 1.0 - 0.95 * intensity;
                map_channels(input, |channel| {
                    let mut previous = 0.0f32;
                    channel
                        .iter()
                        .map(|sample| {
                            let delta = (sample - previous).clamp(-max_delta, max_delta);
                            previous += delta;
                            previous
                        })
                        .collect()
                })
            }

            Stage::DeEss { threshold_db } => map_channels(input, |channel| {
                // Dry/wet split: the wet path emphasizes the sibilance band,
                // gets squashed hard and fast, then mixes back in at 50/50.
                let mut wet = channel.to_vec();
                Biquad::peaking(sample_rate, DE_ESS_FREQUENCY, DE_ESS_Q, DE_ESS_EMPHASIS_DB)
                    .process(&mut wet);
                Compressor::new(sample_rate, *threshold_db, 4.0, 1.0, 10.0).process(&mut wet);
                channel
                    .iter()
                    .zip(&wet)
                    .map(|(dry, wet)| 0.5 * dry + 0.5 * wet)
                    .collect()
            }),

            Stage::Compress {
                threshold_db,
                ratio,
                attack_ms,
                release_ms,
            } => map_channels(input, |channel| {
                let mut samples = channel.to_vec();
                Compressor::new(sample_rate, *threshold_db, *ratio, *attack_ms, *release_ms)
                    .process(&mut samples);
                samples
            }),

            Stage::Limit {
                threshold_db,
                release_ms,
            } => map_channels(input, |channel| {
                let mut samples = channel.to_vec();
                Compressor::limiter(sample_rate, *threshold_db, *release_ms).process(&mut samples);
                samples
            }),

            Stage::Reverb { impulse, wet_level } => {
                map_channels(input, |channel| {
                    reverb::apply_reverb(channel, impulse, *wet_level)
                })
            }

            Stage::StereoWidth { width } => {
                if input.channel_count() != 2 {
                    // Width has no meaning without a stereo pair.
                    return input.clone();
                }
                let left = input.channel(0);
                let right = input.channel(1);
                let mut new_left = Vec::with_capacity(left.len());
                let mut new_right = Vec::with_capacity(right.len());
                for (l, r) in left.iter().zip(right) {
                    let mid = (l + r) * 0.5;
                    let side = (l - r) * 0.5 * width;
                    new_left.push(mid + side);
                    new_right.push(mid - side);
                }
                AudioBuffer::from_raw(vec![new_left, new_right], input.sample_rate())
            }

            Stage::Normalize { target_lufs } => {
                let rms = global_rms(input);
                if rms <= 1e-9 {
                    // Nothing to normalize; amplifying silence only raises noise.
                    return input.clone();
                }
                let gain_db = (target_lufs - lin_to_db(rms))
                    .clamp(-MAX_NORMALIZE_GAIN_DB, MAX_NORMALIZE_GAIN_DB);
                let gain = db_to_lin(gain_db);
                map_channels(input, |channel| {
                    channel.iter().map(|s| s * gain).collect()
                })
            }

            Stage::PeakLimit { ceiling } => {
                let peak = (0..input.channel_count())
                    .flat_map(|c| input.channel(c))
                    .fold(0.0f32, |acc, s| acc.max(s.abs()));
                if peak <= *ceiling {
                    return input.clone();
                }
                let gain = ceiling / peak;
                map_channels(input, |channel| {
                    channel.iter().map(|s| s * gain).collect()
                })
            }

            Stage::Dither { bit_depth, seed } => {
                let lsb = 1.0 / (1i64 << (bit_depth - 1)) as f32;
                let mut rng = StdRng::seed_from_u64(*seed);
                map_channels_sequential(input, |channel| {
                    channel
                        .iter()
                        .map(|s| {
                            // TPDF noise spanning ±1 LSB of the target depth.
                            let noise = rng.gen::<f32>() - rng.gen::<f32>();
                            s + noise * lsb
                        })
                        .collect()
                })
            }
        }
    }
}

fn map_channels<F>(input: &AudioBuffer, f: F) -> AudioBuffer
where
    F: Fn(&[f32]) -> Vec<f32>,
{
    let channels = (0..input.channel_count())
        .map(|c| f(input.channel(c)))
        .collect();
    AudioBuffer::from_raw(channels, input.sample_rate())
}

/// Like [`map_channels`] but for closures that mutate shared state (RNGs).
fn map_channels_sequential<F>(input: &AudioBuffer, mut f: F) -> AudioBuffer
where
    F: FnMut(&[f32]) -> Vec<f32>,
{
    let channels = (0..input.channel_count())
        .map(|c| f(input.channel(c)))
        .collect();
    AudioBuffer::from_raw(channels, input.sample_rate())
}

fn global_rms(buffer: &AudioBuffer) -> f32 {
    let total: usize = buffer.channel_count() * buffer.frames();
    if total == 0 {
        return 0.0;
    }
    let sum_sq: f32 = (0..buffer.channel_count())
        .flat_map(|c| buffer.channel(c))
        .map(|s| s * s)
        .sum();
    (sum_sq / total as f32).sqrt()
}
