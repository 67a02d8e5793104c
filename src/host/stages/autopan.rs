//! Auto-pan sub-graph: a free-running sine LFO scaled to ±0.9 of the full
//! pan range drives a stereo pan stage, sweeping the signal left-right.
//!
//! The LFO runs for the entire life of the graph. When the stage is not
//! spliced into the main path the graph still advances its phase, so
//! re-enabling the effect resumes mid-sweep instead of restarting.

use crate::settings::PanSpeed;

/// Pan excursion as a fraction of the full ±1 range.
const PAN_DEPTH: f64 = 0.9;

#[derive(Debug)]
pub struct AutoPanStage {
    sample_rate: f64,
    frequency_hz: f64,
    phase: f64,
    last_pan: f32,
}

impl AutoPanStage {
    pub fn new(sample_rate: f64, speed: PanSpeed) -> Self {
        Self {
            sample_rate,
            frequency_hz: speed.frequency_hz(),
            phase: 0.0,
            last_pan: 0.0,
        }
    }

    pub fn set_speed(&mut self, speed: PanSpeed) {
        self.frequency_hz = speed.frequency_hz();
    }

    pub fn frequency_hz(&self) -> f64 {
        self.frequency_hz
    }

    /// Pan position produced by the most recent sample, in [-1, 1].
    pub fn last_pan(&self) -> f32 {
        self.last_pan
    }

    #[inline]
    fn step_phase(&mut self) -> f64 {
        let pan = (self.phase * std::f64::consts::TAU).sin() * PAN_DEPTH;
        self.phase += self.frequency_hz / self.sample_rate;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        pan
    }

    /// Keep the LFO running while the stage is out of the signal path.
    pub fn advance_idle(&mut self, frames: usize) {
        for _ in 0..frames {
            self.last_pan = self.step_phase() as f32;
        }
    }

    pub fn process_block(&mut self, buf: &mut [f32]) {
        for frame in buf.chunks_exact_mut(2) {
            let pan = self.step_phase() as f32;
            self.last_pan = pan;
            let (l, r) = (frame[0], frame[1]);
            if pan <= 0.0 {
                // Sweep left: fold right into left, attenuate right.
                frame[0] = l + r * -pan;
                frame[1] = r * (1.0 + pan);
            } else {
                frame[0] = l * (1.0 - pan);
                frame[1] = r + l * pan;
            }
        }
    }
}
