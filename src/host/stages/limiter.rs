//! Dynamics limiter stage: a feed-forward compressor in the shape of
//! WebAudio's DynamicsCompressorNode (threshold, knee, ratio, attack,
//! release over a shared stereo envelope).
//!
//! The stage is always wired last before the destination. Disabling the
//! user limiter does not change topology; the parameters are neutralized
//! in place (threshold 0 dB, ratio 1:1), which reduces gain by nothing.

use crate::settings::LimiterSettings;

#[derive(Debug)]
pub struct LimiterStage {
    sample_rate: f64,
    threshold: f64,
    knee: f64,
    ratio: f64,
    attack: f64,
    release: f64,
    envelope: f64,
}

impl LimiterStage {
    pub fn new(sample_rate: f64) -> Self {
        let mut stage = Self {
            sample_rate,
            threshold: 0.0,
            knee: 0.0,
            ratio: 1.0,
            attack: 0.003,
            release: 0.25,
            envelope: 0.0,
        };
        stage.set_params(&LimiterSettings::default());
        stage
    }

    /// Apply user parameters in place. `enabled: false` neutralizes the
    /// stage rather than unwiring it.
    pub fn set_params(&mut self, params: &LimiterSettings) {
        if params.enabled {
            self.threshold = params.threshold as f64;
            self.knee = params.knee as f64;
            self.ratio = params.ratio as f64;
            self.attack = params.attack as f64;
            self.release = params.release as f64;
        } else {
            self.threshold = 0.0;
            self.knee = 0.0;
            self.ratio = 1.0;
        }
    }

    pub fn threshold_db(&self) -> f64 {
        self.threshold
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn reset(&mut self) {
        self.envelope = 0.0;
    }

    #[inline]
    fn db_from_linear(linear: f64) -> f64 {
        if linear <= 0.0 {
            -120.0
        } else {
            20.0 * linear.log10()
        }
    }

    /// Gain reduction in dB (zero or negative) for an input level in dB.
    #[inline]
    fn gain_reduction_db(&self, input_db: f64) -> f64 {
        let slope = 1.0 - 1.0 / self.ratio;
        if self.knee <= 0.0 {
            if input_db <= self.threshold {
                0.0
            } else {
                (self.threshold - input_db) * slope
            }
        } else {
            let half_knee = self.knee / 2.0;
            let knee_start = self.threshold - half_knee;
            if input_db <= knee_start {
                0.0
            } else if input_db >= self.threshold + half_knee {
                (self.threshold - input_db) * slope
            } else {
                let x = (input_db - knee_start) / self.knee;
                -x * x * slope * half_knee
            }
        }
    }

    pub fn process_block(&mut self, buf: &mut [f32]) {
        let attack_coef = (-1.0 / (self.attack * self.sample_rate)).exp();
        let release_coef = (-1.0 / (self.release * self.sample_rate)).exp();

        for frame in buf.chunks_exact_mut(2) {
            let level = frame[0].abs().max(frame[1].abs()) as f64;
            if level > self.envelope {
                self.envelope = attack_coef * (self.envelope - level) + level;
            } else {
                self.envelope = release_coef * (self.envelope - level) + level;
            }

            let reduction_db = self.gain_reduction_db(Self::db_from_linear(self.envelope));
            let gain = 10.0_f64.powf(reduction_db / 20.0) as f32;
            frame[0] *= gain;
            frame[1] *= gain;
        }
    }
}
