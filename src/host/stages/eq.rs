//! One equalizer band: a second-order peaking filter at a fixed center
//! frequency, Direct Form II Transposed, coefficients from the Audio EQ
//! Cookbook (Robert Bristow-Johnson) — the same formulas WebAudio's
//! BiquadFilterNode uses.
//!
//! Gain changes ramp over a short window; coefficients are recomputed
//! once per block from the ramped value.

use super::Ramp;
use crate::settings::clamp_band_gain;

const BAND_Q: f64 = 1.0;

#[derive(Debug)]
pub struct EqBand {
    frequency: f64,
    sample_rate: f64,
    gain_db: Ramp,
    applied_gain_db: f32,

    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,

    // Filter state, one pair per channel.
    z1: [f64; 2],
    z2: [f64; 2],
}

impl EqBand {
    /// A flat (0 dB) band at `frequency` Hz.
    pub fn new(frequency: f64, sample_rate: f64) -> Self {
        let mut band = Self {
            frequency,
            sample_rate,
            gain_db: Ramp::new(0.0),
            applied_gain_db: 0.0,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            z1: [0.0; 2],
            z2: [0.0; 2],
        };
        band.update_coefficients(0.0);
        band
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Gain the band is ramping toward.
    pub fn target_gain_db(&self) -> f32 {
        self.gain_db.target()
    }

    /// Schedule a ramp to `gain_db` (clamped to ±12), canceling any ramp
    /// in flight.
    pub fn set_gain_db(&mut self, gain_db: f32, ramp_samples: u32) {
        self.gain_db
            .set_target(clamp_band_gain(gain_db), ramp_samples);
    }

    fn update_coefficients(&mut self, gain_db: f32) {
        let w0 = std::f64::consts::TAU * self.frequency / self.sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * BAND_Q);
        let a_lin = 10.0_f64.powf(gain_db as f64 / 40.0);

        let b0 = 1.0 + alpha * a_lin;
        let b1 = -2.0 * cos_w0;
        let b2 = 1.0 - alpha * a_lin;
        let a0 = 1.0 + alpha / a_lin;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha / a_lin;

        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = a1 / a0;
        self.a2 = a2 / a0;
        self.applied_gain_db = gain_db;
    }

    pub fn reset(&mut self) {
        self.z1 = [0.0; 2];
        self.z2 = [0.0; 2];
    }

    pub fn process_block(&mut self, buf: &mut [f32]) {
        let frames = (buf.len() / 2) as u32;
        let gain = self.gain_db.step_block(frames);
        if gain != self.applied_gain_db {
            self.update_coefficients(gain);
        }

        for frame in buf.chunks_exact_mut(2) {
            for (ch, sample) in frame.iter_mut().enumerate() {
                let input = *sample as f64;
                let output = self.b0 * input + self.z1[ch];
                self.z1[ch] = self.b1 * input - self.a1 * output + self.z2[ch];
                self.z2[ch] = self.b2 * input - self.a2 * output;
                *sample = output as f32;
            }
        }
    }
}
