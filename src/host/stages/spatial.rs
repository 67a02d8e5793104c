//! Stereo spatialization sub-graph: the channels are split, delayed and
//! gained independently, cross-fed into each other, and merged back.
//!
//! Each named mode is a fixed preset tuple
//! `(left_delay_ms, right_delay_ms, left_gain, right_gain, cross_l, cross_r)`
//! scaled by the width parameter (0–100 → 0.0–1.0). `Off` or an
//! unrecognized mode resets everything to neutral.

use crate::settings::{SpatialMode, SpatialSettings};

/// Maximum per-channel delay the sub-graph ever uses.
const MAX_DELAY_MS: f64 = 1.0;

/// Resolved per-channel parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialParams {
    pub left_delay_ms: f64,
    pub right_delay_ms: f64,
    pub left_gain: f32,
    pub right_gain: f32,
    /// Amount of the delayed right channel fed into the left output.
    pub cross_l: f32,
    /// Amount of the delayed left channel fed into the right output.
    pub cross_r: f32,
}

impl SpatialParams {
    pub const NEUTRAL: SpatialParams = SpatialParams {
        left_delay_ms: 0.0,
        right_delay_ms: 0.0,
        left_gain: 1.0,
        right_gain: 1.0,
        cross_l: 0.0,
        cross_r: 0.0,
    };

    /// Preset tuple for a mode at full width.
    fn preset(mode: SpatialMode) -> SpatialParams {
        match mode {
            SpatialMode::Wide => SpatialParams {
                left_delay_ms: 0.2,
                right_delay_ms: 0.2,
                left_gain: 1.2,
                right_gain: 1.2,
                cross_l: -0.4,
                cross_r: -0.4,
            },
            SpatialMode::Surround => SpatialParams {
                left_delay_ms: 0.5,
                right_delay_ms: 0.3,
                left_gain: 1.1,
                right_gain: 1.1,
                cross_l: 0.35,
                cross_r: 0.35,
            },
            SpatialMode::ThreeD => SpatialParams {
                left_delay_ms: 0.3,
                right_delay_ms: 0.6,
                left_gain: 1.15,
                right_gain: 1.15,
                cross_l: -0.25,
                cross_r: 0.35,
            },
            SpatialMode::SevenD => SpatialParams {
                left_delay_ms: 0.8,
                right_delay_ms: 0.5,
                left_gain: 1.2,
                right_gain: 1.2,
                cross_l: -0.45,
                cross_r: 0.45,
            },
            SpatialMode::Off => SpatialParams::NEUTRAL,
        }
    }

    /// Resolve settings into parameters: the mode preset scaled by
    /// `width / 100`. Delays and cross-feeds scale toward zero, gains
    /// toward unity.
    pub fn resolve(settings: &SpatialSettings) -> SpatialParams {
        let preset = Self::preset(settings.mode);
        // Widen before dividing; a single-precision width fraction drifts
        // visibly once multiplied into the delay times.
        let scale = settings.width.clamp(0.0, 100.0) as f64 / 100.0;
        let s = scale as f32;
        SpatialParams {
            left_delay_ms: preset.left_delay_ms * scale,
            right_delay_ms: preset.right_delay_ms * scale,
            left_gain: 1.0 + (preset.left_gain - 1.0) * s,
            right_gain: 1.0 + (preset.right_gain - 1.0) * s,
            cross_l: preset.cross_l * s,
            cross_r: preset.cross_r * s,
        }
    }
}

/// Fixed-length mono delay line (ring buffer).
#[derive(Debug)]
struct DelayLine {
    buffer: Vec<f32>,
    write_pos: usize,
    delay_samples: usize,
}

impl DelayLine {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0.0; capacity.max(1)],
            write_pos: 0,
            delay_samples: 0,
        }
    }

    fn set_delay(&mut self, samples: usize) {
        self.delay_samples = samples.min(self.buffer.len() - 1);
    }

    /// Write one sample, read the delayed one.
    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let len = self.buffer.len();
        let read_pos = (self.write_pos + len - self.delay_samples) % len;
        let delayed = self.buffer[read_pos];
        self.buffer[self.write_pos] = input;
        self.write_pos = (self.write_pos + 1) % len;
        if self.delay_samples == 0 { input } else { delayed }
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
    }
}

#[derive(Debug)]
pub struct SpatialStage {
    sample_rate: f64,
    params: SpatialParams,
    delay_l: DelayLine,
    delay_r: DelayLine,
}

impl SpatialStage {
    pub fn new(sample_rate: f64) -> Self {
        let capacity = (sample_rate * MAX_DELAY_MS / 1000.0).ceil() as usize + 1;
        Self {
            sample_rate,
            params: SpatialParams::NEUTRAL,
            delay_l: DelayLine::new(capacity),
            delay_r: DelayLine::new(capacity),
        }
    }

    pub fn params(&self) -> SpatialParams {
        self.params
    }

    pub fn apply(&mut self, settings: &SpatialSettings) {
        self.params = SpatialParams::resolve(settings);
        let to_samples =
            |ms: f64| (ms / 1000.0 * self.sample_rate).round() as usize;
        self.delay_l.set_delay(to_samples(self.params.left_delay_ms));
        self.delay_r.set_delay(to_samples(self.params.right_delay_ms));
    }

    pub fn reset(&mut self) {
        self.delay_l.clear();
        self.delay_r.clear();
    }

    pub fn process_block(&mut self, buf: &mut [f32]) {
        for frame in buf.chunks_exact_mut(2) {
            let dl = self.delay_l.process(frame[0]);
            let dr = self.delay_r.process(frame[1]);
            frame[0] = dl * self.params.left_gain + dr * self.params.cross_l;
            frame[1] = dr * self.params.right_gain + dl * self.params.cross_r;
        }
    }
}
