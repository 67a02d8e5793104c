//! Volume stage. User volume is a percentage (0–800); the applied linear
//! gain is `clamp(volume, 0, 800) / 100`, reached through a short linear
//! ramp so volume changes never click.

use super::Ramp;
use crate::settings::clamp_volume;

#[derive(Debug)]
pub struct GainStage {
    gain: Ramp,
}

impl GainStage {
    /// Unity gain (volume 100%).
    pub fn new() -> Self {
        Self {
            gain: Ramp::new(1.0),
        }
    }

    /// Schedule a ramp to the gain for `volume` percent. An in-flight
    /// ramp is canceled and replaced.
    pub fn set_volume(&mut self, volume: f32, ramp_samples: u32) {
        self.gain
            .set_target(clamp_volume(volume) / 100.0, ramp_samples);
    }

    /// Current (possibly mid-ramp) linear gain.
    pub fn gain(&self) -> f32 {
        self.gain.value()
    }

    pub fn target_gain(&self) -> f32 {
        self.gain.target()
    }

    pub fn process_block(&mut self, buf: &mut [f32]) {
        for frame in buf.chunks_exact_mut(2) {
            let g = self.gain.next();
            frame[0] *= g;
            frame[1] *= g;
        }
    }
}
