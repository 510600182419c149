//! Declarative processing-chain configuration.
//!
//! A `ProcessingChain` is data, not code: five stage groups, every stage
//! optional and independently parameterized. The engine renders enabled
//! stages in one fixed canonical order (cleanup → EQ → dynamics → spatial →
//! mastering) no matter how the configuration was assembled — reproducible
//! output depends on that ordering staying out of user control.
//!
//! Validation happens before any audio is touched: a malformed chain fails
//! fast instead of mid-render.

use serde::{Deserialize, Serialize};

use crate::error::{FabulaError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessingChain {
    pub noise_cleanup: NoiseCleanup,
    pub eq_shaping: EqShaping,
    pub dynamic_control: DynamicControl,
    pub spatial_enhancement: SpatialEnhancement,
    pub mastering: Mastering,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NoiseCleanup {
    pub high_pass_filter: Option<HighPassParams>,
    pub de_esser: Option<DeEsserParams>,
    pub de_click: Option<DeClickParams>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EqShaping {
    pub high_pass: Option<FilterParams>,
    pub low_pass: Option<FilterParams>,
    pub parametric_eq: Option<ParametricEqParams>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DynamicControl {
    pub compression: Option<CompressionParams>,
    pub limiting: Option<LimitingParams>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpatialEnhancement {
    pub reverb: Option<ReverbParams>,
    /// Mid/side width factor: 1.0 = unchanged, 0.0 = mono, 2.0 = doubled.
    pub stereo_width: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Mastering {
    pub normalization: Option<NormalizationParams>,
    pub peak_limiting: Option<PeakLimitingParams>,
    pub dithering: Option<DitheringParams>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighPassParams {
    /// Cutoff in Hz.
    pub frequency: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeEsserParams {
    /// Sibilance threshold in dBFS for the wet-path compressor.
    pub threshold: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeClickParams {
    /// Click suppression amount in [0, 1].
    pub intensity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterParams {
    /// Cutoff in Hz.
    pub frequency: f32,
    /// Resonance; Butterworth when omitted.
    #[serde(default = "default_filter_q")]
    pub q: f32,
}

fn default_filter_q() -> f32 {
    std::f32::consts::FRAC_1_SQRT_2
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EqBand {
    /// Center frequency in Hz.
    pub frequency: f32,
    /// Boost/cut in dB.
    pub gain: f32,
    /// Bandwidth.
    pub q: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParametricEqParams {
    /// Applied in array order, after the high/low-pass pair.
    pub bands: Vec<EqBand>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionParams {
    /// Threshold in dBFS.
    pub threshold: f32,
    /// Ratio, `n`:1.
    pub ratio: f32,
    /// Attack in milliseconds.
    pub attack: f32,
    /// Release in milliseconds.
    pub release: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitingParams {
    /// Ceiling threshold in dBFS.
    pub threshold: f32,
    /// Release in milliseconds.
    pub release: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReverbParams {
    /// Tail length in seconds; also seeds the impulse generator.
    pub room_size: f32,
    /// Decay steepness in [0, 1].
    pub damping: f32,
    /// Linear wet mix in [0, 1]; dry mix is `1 - wet_level`.
    pub wet_level: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizationParams {
    /// Target integrated loudness (approximated as RMS dBFS).
    pub target_lufs: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeakLimitingParams {
    /// Linear sample ceiling in (0, 1].
    #[serde(default = "default_ceiling")]
    pub ceiling: f32,
}

fn default_ceiling() -> f32 {
    0.985
}

impl Default for PeakLimitingParams {
    fn default() -> Self {
        Self {
            ceiling: default_ceiling(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DitheringParams {
    /// Output word length the TPDF noise is scaled for.
    #[serde(default = "default_bit_depth")]
    pub bit_depth: u16,
}

fn default_bit_depth() -> u16 {
    16
}

impl Default for DitheringParams {
    fn default() -> Self {
        Self {
            bit_depth: default_bit_depth(),
        }
    }
}

impl ProcessingChain {
    /// True when no stage is enabled — rendering such a chain is the
    /// identity function.
    pub fn is_empty(&self) -> bool {
        *self == ProcessingChain::default()
    }

    /// Check every enabled stage's parameters. Cheap, no audio involved.
    pub fn validate(&self) -> Result<()> {
        if let Some(hp) = &self.noise_cleanup.high_pass_filter {
            check_range("noiseCleanup.highPassFilter.frequency", hp.frequency, 1.0, 20_000.0)?;
        }
        if let Some(de) = &self.noise_cleanup.de_esser {
            check_range("noiseCleanup.deEsser.threshold", de.threshold, -96.0, 0.0)?;
        }
        if let Some(dc) = &self.noise_cleanup.de_click {
            check_range("noiseCleanup.deClick.intensity", dc.intensity, 0.0, 1.0)?;
        }

        if let Some(hp) = &self.eq_shaping.high_pass {
            check_range("eqShaping.highPass.frequency", hp.frequency, 1.0, 20_000.0)?;
            check_range("eqShaping.highPass.q", hp.q, 0.1, 18.0)?;
        }
        if let Some(lp) = &self.eq_shaping.low_pass {
            check_range("eqShaping.lowPass.frequency", lp.frequency, 1.0, 20_000.0)?;
            check_range("eqShaping.lowPass.q", lp.q, 0.1, 18.0)?;
        }
        if let Some(eq) = &self.eq_shaping.parametric_eq {
            for (i, band) in eq.bands.iter().enumerate() {
                let label = format!("eqShaping.parametricEq.bands[{i}]");
                check_range(&format!("{label}.frequency"), band.frequency, 1.0, 20_000.0)?;
                check_range(&format!("{label}.gain"), band.gain, -24.0, 24.0)?;
                check_range(&format!("{label}.q"), band.q, 0.1, 18.0)?;
            }
        }

        if let Some(comp) = &self.dynamic_control.compression {
            check_range("dynamicControl.compression.threshold", comp.threshold, -96.0, 0.0)?;
            check_range("dynamicControl.compression.ratio", comp.ratio, 1.0, 20.0)?;
            check_range("dynamicControl.compression.attack", comp.attack, 0.0, 1_000.0)?;
            check_range("dynamicControl.compression.release", comp.release, 0.0, 5_000.0)?;
        }
        if let Some(lim) = &self.dynamic_control.limiting {
            check_range("dynamicControl.limiting.threshold", lim.threshold, -96.0, 0.0)?;
            check_range("dynamicControl.limiting.release", lim.release, 0.0, 5_000.0)?;
        }

        if let Some(rev) = &self.spatial_enhancement.reverb {
            check_range("spatialEnhancement.reverb.roomSize", rev.room_size, 0.01, 10.0)?;
            check_range("spatialEnhancement.reverb.damping", rev.damping, 0.0, 1.0)?;
            check_range("spatialEnhancement.reverb.wetLevel", rev.wet_level, 0.0, 1.0)?;
        }
        if let Some(width) = self.spatial_enhancement.stereo_width {
            check_range("spatialEnhancement.stereoWidth", width, 0.0, 2.0)?;
        }

        if let Some(norm) = &self.mastering.normalization {
            check_range("mastering.normalization.targetLufs", norm.target_lufs, -70.0, 0.0)?;
        }
        if let Some(peak) = &self.mastering.peak_limiting {
            check_range("mastering.peakLimiting.ceiling", peak.ceiling, 0.01, 1.0)?;
        }
        if let Some(dither) = &self.mastering.dithering {
            if !(8..=24).contains(&dither.bit_depth) {
                return Err(FabulaError::Validation(format!(
                    "mastering.dithering.bitDepth must be within 8–24 (got {})",
                    dither.bit_depth
                )));
            }
        }

        Ok(())
    }

    /// Every enabled filter frequency must sit below Nyquist for the buffer
    /// the chain is about to render against.
    pub fn validate_for_rate(&self, sample_rate: u32) -> Result<()> {
        let nyquist = sample_rate as f32 / 2.0;
        let check = |label: &str, frequency: f32| -> Result<()> {
            if frequency >= nyquist {
                return Err(FabulaError::Validation(format!(
                    "{label}: {frequency} Hz is at or above Nyquist ({nyquist} Hz)"
                )));
            }
            Ok(())
        };

        if let Some(hp) = &self.noise_cleanup.high_pass_filter {
            check("noiseCleanup.highPassFilter.frequency", hp.frequency)?;
        }
        if let Some(hp) = &self.eq_shaping.high_pass {
            check("eqShaping.highPass.frequency", hp.frequency)?;
        }
        if let Some(lp) = &self.eq_shaping.low_pass {
            check("eqShaping.lowPass.frequency", lp.frequency)?;
        }
        if let Some(eq) = &self.eq_shaping.parametric_eq {
            for (i, band) in eq.bands.iter().enumerate() {
                check(
                    &format!("eqShaping.parametricEq.bands[{i}].frequency"),
                    band.frequency,
                )?;
            }
        }
        Ok(())
    }
}

fn check_range(label: &str, value: f32, min: f32, max: f32) -> Result<()> {
    if !value.is_finite() || value < min || value > max {
        return Err(FabulaError::Validation(format!(
            "{label} must be within {min}–{max} (got {value})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_chain_is_empty_and_valid() {
        let chain = ProcessingChain::default();
        assert!(chain.is_empty());
        chain.validate().unwrap();
        chain.validate_for_rate(44_100).unwrap();
    }

    #[test]
    fn deserializes_from_ui_shaped_json() {
        let chain: ProcessingChain = serde_json::from_str(
            r#"{
                "dynamicControl": {
                    "compression": {"threshold": -20.0, "ratio": 4.0, "attack": 5.0, "release": 50.0}
                },
                "eqShaping": {
                    "highPass": {"frequency": 80.0},
                    "parametricEq": {"bands": [{"frequency": 3000.0, "gain": 2.5, "q": 1.0}]}
                }
            }"#,
        )
        .unwrap();

        assert!(!chain.is_empty());
        chain.validate().unwrap();
        let comp = chain.dynamic_control.compression.unwrap();
        assert!((comp.ratio - 4.0).abs() < 1e-6);
        let hp = chain.eq_shaping.high_pass.unwrap();
        // Butterworth default when q is omitted
        assert!((hp.q - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_frequency_rejected() {
        let mut chain = ProcessingChain::default();
        chain.noise_cleanup.high_pass_filter = Some(HighPassParams { frequency: -50.0 });
        let err = chain.validate().unwrap_err();
        assert!(matches!(err, FabulaError::Validation(_)));
        assert!(err.to_string().contains("highPassFilter"));
    }

    #[test]
    fn negative_ratio_rejected() {
        let mut chain = ProcessingChain::default();
        chain.dynamic_control.compression = Some(CompressionParams {
            threshold: -20.0,
            ratio: -4.0,
            attack: 5.0,
            release: 50.0,
        });
        assert!(chain.validate().is_err());
    }

    #[test]
    fn nan_parameters_rejected() {
        let mut chain = ProcessingChain::default();
        chain.spatial_enhancement.reverb = Some(ReverbParams {
            room_size: f32::NAN,
            damping: 0.5,
            wet_level: 0.3,
        });
        assert!(chain.validate().is_err());
    }

    #[test]
    fn filter_above_nyquist_rejected_for_low_rate_buffers() {
        let mut chain = ProcessingChain::default();
        chain.eq_shaping.low_pass = Some(FilterParams {
            frequency: 12_000.0,
            q: default_filter_q(),
        });
        chain.validate().unwrap();
        chain.validate_for_rate(44_100).unwrap();
        assert!(chain.validate_for_rate(16_000).is_err());
    }

    #[test]
    fn serde_round_trip_preserves_chain() {
        let mut chain = ProcessingChain::default();
        chain.spatial_enhancement.reverb = Some(ReverbParams {
            room_size: 1.5,
            damping: 0.4,
            wet_level: 0.25,
        });
        chain.mastering.normalization = Some(NormalizationParams { target_lufs: -16.0 });

        let json = serde_json::to_string(&chain).unwrap();
        let back: ProcessingChain = serde_json::from_str(&json).unwrap();
        assert_eq!(chain, back);
    }
}
