//! Signal-processing stages of the graph. Every stage transforms
//! interleaved stereo blocks in place.

mod analyser;
mod autopan;
mod eq;
mod gain;
mod limiter;
mod spatial;

pub use analyser::AnalyserTap;
pub use autopan::AutoPanStage;
pub use eq::EqBand;
pub use gain::GainStage;
pub use limiter::LimiterStage;
pub use spatial::{SpatialParams, SpatialStage};

/// A linear parameter ramp. Scheduling a new target cancels any in-flight
/// ramp and restarts from the current value, so parameter changes never
/// jump audibly.
#[derive(Debug, Clone, Copy)]
pub struct Ramp {
    current: f32,
    target: f32,
    step: f32,
    remaining: u32,
}

impl Ramp {
    pub fn new(value: f32) -> Self {
        Self {
            current: value,
            target: value,
            step: 0.0,
            remaining: 0,
        }
    }

    /// Ramp linearly to `target` over `samples` steps, replacing any ramp
    /// already in flight.
    pub fn set_target(&mut self, target: f32, samples: u32) {
        self.target = target;
        if samples == 0 {
            self.current = target;
            self.remaining = 0;
            self.step = 0.0;
        } else {
            self.step = (target - self.current) / samples as f32;
            self.remaining = samples;
        }
    }

    /// Advance one step and return the new value.
    pub fn next(&mut self) -> f32 {
        if self.remaining > 0 {
            self.current += self.step;
            self.remaining -= 1;
            if self.remaining == 0 {
                self.current = self.target;
            }
        }
        self.current
    }

    /// Advance `steps` at once and return the new value. Used by stages
    /// that update coefficients per block rather than per sample.
    pub fn step_block(&mut self, steps: u32) -> f32 {
        let consumed = steps.min(self.remaining);
        self.current += self.step * consumed as f32;
        self.remaining -= consumed;
        if self.remaining == 0 {
            self.current = self.target;
        }
        self.current
    }

    pub fn value(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_reaches_target_exactly() {
        let mut ramp = Ramp::new(0.0);
        ramp.set_target(1.0, 10);
        let mut last = 0.0;
        for _ in 0..10 {
            last = ramp.next();
        }
        assert_eq!(last, 1.0);
        assert_eq!(ramp.next(), 1.0);
    }

    #[test]
    fn new_target_cancels_inflight_ramp() {
        let mut ramp = Ramp::new(0.0);
        ramp.set_target(1.0, 100);
        for _ in 0..50 {
            ramp.next();
        }
        let midpoint = ramp.value();
        assert!((midpoint - 0.5).abs() < 1e-4);

        // The replacement ramp starts from the midpoint, not from 0 or 1.
        ramp.set_target(0.0, 50);
        let first = ramp.next();
        assert!(first < midpoint);
        for _ in 0..49 {
            ramp.next();
        }
        assert_eq!(ramp.value(), 0.0);
    }

    #[test]
    fn zero_length_ramp_jumps() {
        let mut ramp = Ramp::new(0.25);
        ramp.set_target(2.0, 0);
        assert_eq!(ramp.value(), 2.0);
    }

    #[test]
    fn block_stepping_matches_per_sample() {
        let mut a = Ramp::new(0.0);
        let mut b = Ramp::new(0.0);
        a.set_target(1.0, 64);
        b.set_target(1.0, 64);
        for _ in 0..40 {
            a.next();
        }
        b.step_block(40);
        assert!((a.value() - b.value()).abs() < 1e-5);
        b.step_block(1000);
        assert_eq!(b.value(), 1.0);
    }
}
