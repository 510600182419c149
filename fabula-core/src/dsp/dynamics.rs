//! Envelope-follower dynamics: compression and limiting.
//!
//! Configuration carries attack/release in milliseconds (the unit the
//! casting UI exposes); they are converted to per-sample smoothing
//! coefficients here. There is deliberately no makeup gain — a compressor
//! over silence must output silence.

/// Feed-forward peak compressor with a hard knee.
#[derive(Debug, Clone)]
pub struct Compressor {
    threshold_db: f32,
    ratio: f32,
    attack_coef: f32,
    release_coef: f32,
    envelope: f32,
}

impl Compressor {
    pub fn new(
        sample_rate: f32,
        threshold_db: f32,
        ratio: f32,
        attack_ms: f32,
        release_ms: f32,
    ) -> Self {
        Self {
            threshold_db,
            ratio: ratio.max(1.0),
            attack_coef: smoothing_coef(attack_ms, sample_rate),
            release_coef: smoothing_coef(release_ms, sample_rate),
            envelope: 0.0,
        }
    }

    /// Limiter preset: compression with the ratio forced to 20:1, near-zero
    /// attack and a zero knee.
    pub fn limiter(sample_rate: f32, threshold_db: f32, release_ms: f32) -> Self {
        Self::new(sample_rate, threshold_db, 20.0, 0.05, release_ms)
    }

    #[inline]
    pub fn process_sample(&mut self, x: f32) -> f32 {
        let level = x.abs();
        let coef = if level > self.envelope {
            self.attack_coef
        } else {
            self.release_coef
        };
        self.envelope = coef * self.envelope + (1.0 - coef) * level;

        // Silence never triggers gain computation.
        if self.envelope <= 1e-9 {
            return x;
        }

        let envelope_db = lin_to_db(self.envelope);
        let over_db = envelope_db - self.threshold_db;
        if over_db <= 0.0 {
            return x;
        }

        let gain_db = -over_db * (1.0 - 1.0 / self.ratio);
        x * db_to_lin(gain_db)
    }

    /// Compress a channel in place.
    pub fn process(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }

    pub fn reset(&mut self) {
        self.envelope = 0.0;
    }
}

/// One-pole smoothing coefficient for a time constant given in milliseconds.
fn smoothing_coef(ms: f32, sample_rate: f32) -> f32 {
    let seconds = ms.max(0.0) / 1_000.0;
    if seconds <= 0.0 {
        return 0.0; // instantaneous
    }
    (-1.0 / (seconds * sample_rate)).exp()
}

#[inline]
pub(crate) fn db_to_lin(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

#[inline]
pub(crate) fn lin_to_db(lin: f32) -> f32 {
    20.0 * lin.max(1e-12).log10()
}
