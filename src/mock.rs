//! Synthetic ECG source for tests and hardware-free demos.

use rand::Rng;

/// Generates a steady ECG-like waveform at a fixed rhythm, one scaled
/// voltage sample per call, with optional additive noise.
pub struct SyntheticEcg {
    sample_rate: f64,
    bpm: f64,
    noise_amplitude: f64,
    emitted: u64,
}

impl SyntheticEcg {
    pub fn new(sample_rate: f64, bpm: f64) -> Self {
        Self {
            sample_rate,
            bpm,
            noise_amplitude: 0.02,
            emitted: 0,
        }
    }

    /// Peak amplitude of the additive noise; 0.0 makes the source exactly
    /// reproducible.
    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise_amplitude = amplitude;
        self
    }

    pub fn next_sample(&mut self) -> f64 {
        let time = self.emitted as f64 / self.sample_rate;
        self.emitted += 1;

        // position within the current beat, 0.0..1.0
        let cycle = (time * self.bpm / 60.0).fract();
        let mut value = ecg_cycle(cycle);

        if self.noise_amplitude > 0.0 {
            value += rand::thread_rng().gen_range(-self.noise_amplitude..self.noise_amplitude);
        }
        value
    }

    pub fn next_batch(&mut self, len: usize) -> Vec<f64> {
        (0..len).map(|_| self.next_sample()).collect()
    }
}

/// Piecewise P-QRS-T morphology over one normalized beat.
fn ecg_cycle(cycle: f64) -> f64 {
    let p_wave = 0.15;
    let qrs = 1.0;
    let t_wave = 0.3;

    if cycle < 0.10 {
        // P wave
        (cycle / 0.10) * p_wave
    } else if cycle < 0.15 {
        ((0.15 - cycle) / 0.05) * p_wave
    } else if cycle < 0.24 {
        0.0
    } else if cycle < 0.28 {
        // R upstroke
        ((cycle - 0.24) / 0.04) * qrs
    } else if cycle < 0.33 {
        // fall through to the S dip
        qrs - ((cycle - 0.28) / 0.05) * (qrs + 0.2)
    } else if cycle < 0.38 {
        -0.2 + ((cycle - 0.33) / 0.05) * 0.2
    } else if cycle < 0.55 {
        0.0
    } else if cycle < 0.75 {
        // T wave, a smooth hump
        let u = (cycle - 0.55) / 0.20;
        4.0 * u * (1.0 - u) * t_wave
    } else {
        0.0
    }
}
