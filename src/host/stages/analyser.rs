//! Analysis tap: a parallel, read-only observer of the limiter output.
//!
//! Keeps a sliding mono window of the most recent post-limiter samples and
//! turns it into a byte frequency-magnitude buffer on demand (Goertzel
//! magnitude per log-spaced bin, dB-mapped to 0–255 with exponential
//! smoothing across snapshots — the shape visualizers expect from an
//! analyser node). Snapshot reads never block the signal path.

/// Number of frequency bins in a snapshot.
pub const ANALYSER_BINS: usize = 32;

/// Analysis window length in mono samples.
const WINDOW_LEN: usize = 2048;

/// dB range mapped onto 0–255.
const MIN_DB: f64 = -100.0;
const MAX_DB: f64 = -30.0;

/// Smoothing factor applied to bin magnitudes between snapshots.
const SMOOTHING: f64 = 0.8;

#[derive(Debug)]
pub struct AnalyserTap {
    bin_frequencies: [f64; ANALYSER_BINS],
    sample_rate: f64,
    window: Vec<f32>,
    write_pos: usize,
    filled: usize,
    smoothed: [f64; ANALYSER_BINS],
}

impl AnalyserTap {
    pub fn new(sample_rate: f64) -> Self {
        // Log-spaced bins spanning the audible EQ range, 32 Hz – 16 kHz.
        let mut bin_frequencies = [0.0; ANALYSER_BINS];
        let ratio = (16_000.0_f64 / 32.0).powf(1.0 / (ANALYSER_BINS - 1) as f64);
        let mut freq = 32.0;
        for bin in bin_frequencies.iter_mut() {
            *bin = freq;
            freq *= ratio;
        }
        Self {
            bin_frequencies,
            sample_rate,
            window: vec![0.0; WINDOW_LEN],
            write_pos: 0,
            filled: 0,
            smoothed: [0.0; ANALYSER_BINS],
        }
    }

    /// Observe a processed stereo block. Mono-summed into the window.
    pub fn push_block(&mut self, buf: &[f32]) {
        for frame in buf.chunks_exact(2) {
            self.window[self.write_pos] = (frame[0] + frame[1]) * 0.5;
            self.write_pos = (self.write_pos + 1) % WINDOW_LEN;
            self.filled = (self.filled + 1).min(WINDOW_LEN);
        }
    }

    /// Goertzel magnitude of the current window at `frequency`, normalized
    /// so a full-scale sine reads ~1.0.
    fn magnitude_at(&self, frequency: f64) -> f64 {
        let n = self.filled;
        if n == 0 {
            return 0.0;
        }
        let coeff = 2.0 * (std::f64::consts::TAU * frequency / self.sample_rate).cos();
        let mut s1 = 0.0_f64;
        let mut s2 = 0.0_f64;
        let start = (self.write_pos + WINDOW_LEN - n) % WINDOW_LEN;
        for i in 0..n {
            let x = self.window[(start + i) % WINDOW_LEN] as f64;
            let s = x + coeff * s1 - s2;
            s2 = s1;
            s1 = s;
        }
        let power = s1 * s1 + s2 * s2 - coeff * s1 * s2;
        power.max(0.0).sqrt() / (n as f64 / 2.0)
    }

    /// Produce the byte magnitude buffer from the most recent window.
    pub fn snapshot(&mut self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ANALYSER_BINS);
        for i in 0..ANALYSER_BINS {
            let mag = self.magnitude_at(self.bin_frequencies[i]);
            self.smoothed[i] = SMOOTHING * self.smoothed[i] + (1.0 - SMOOTHING) * mag;
            let db = if self.smoothed[i] <= 0.0 {
                MIN_DB
            } else {
                20.0 * self.smoothed[i].log10()
            };
            let scaled = (db - MIN_DB) / (MAX_DB - MIN_DB) * 255.0;
            out.push(scaled.clamp(0.0, 255.0) as u8);
        }
        out
    }

    pub fn reset(&mut self) {
        self.window.fill(0.0);
        self.write_pos = 0;
        self.filled = 0;
        self.smoothed = [0.0; ANALYSER_BINS];
    }
}
