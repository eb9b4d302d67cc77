use ndarray::ArrayView1;
use ndarray_stats::QuantileExt;

use super::Parameters;

/// Adaptive thresholds plus the R-peak acceptance rule.
///
/// Two exponential averages of the sliding-window maximum track the noise
/// floor (slow) and the R-peak amplitude (fast); the detection thresholds are
/// derived from those on every batch. A sample is accepted as an R-peak when
/// it clears the high threshold, rises steeply enough, and sits far enough
/// after the previously accepted peak. Peak positions are absolute sample
/// indices counted from the start of the stream, so the minimum-distance rule
/// holds across batch boundaries.
#[derive(Debug)]
pub struct RPeakDetector {
    noise_smoothing: f64,
    signal_smoothing: f64,
    threshold_fraction: f64,
    high_fraction: f64,
    slope_fraction: f64,
    min_peak_distance: u64,

    noise_peak: f64,
    signal_peak: f64,
    threshold_low: f64,
    threshold_high: f64,
    last_peak_index: u64,
    // absolute index of the first sample of the next batch
    next_index: u64,
}

impl RPeakDetector {
    pub fn new(params: &Parameters) -> Self {
        Self {
            noise_smoothing: params.noise_smoothing,
            signal_smoothing: params.signal_smoothing,
            threshold_fraction: params.threshold_fraction,
            high_fraction: params.high_fraction,
            slope_fraction: params.slope_fraction,
            min_peak_distance: params.min_peak_distance,
            noise_peak: 0.0,
            signal_peak: 0.0,
            threshold_low: 0.0,
            threshold_high: 0.0,
            last_peak_index: 0,
            next_index: 0,
        }
    }

    /// Re-derive the thresholds from the current analysis window. An empty
    /// window leaves them untouched.
    pub fn update_thresholds(&mut self, window: &[f64]) {
        let current_max = match ArrayView1::from(window).max() {
            Ok(&max) => max,
            Err(_) => return,
        };

        self.noise_peak =
            self.noise_smoothing * self.noise_peak + (1.0 - self.noise_smoothing) * current_max;
        self.signal_peak =
            self.signal_smoothing * self.signal_peak + (1.0 - self.signal_smoothing) * current_max;

        self.threshold_low =
            self.noise_peak + self.threshold_fraction * (self.signal_peak - self.noise_peak);
        self.threshold_high = self.high_fraction * self.signal_peak;
    }

    /// Current `(threshold_low, threshold_high)` pair, e.g. for telemetry.
    /// Both are zero until the first non-empty window has been seen.
    pub fn thresholds(&self) -> (f64, f64) {
        (self.threshold_low, self.threshold_high)
    }

    /// Scan one filtered batch and return the absolute indices of the
    /// accepted R-peaks, in order.
    pub fn detect(&mut self, filtered: ArrayView1<f64>) -> Vec<u64> {
        let base = self.next_index;
        self.next_index += filtered.len() as u64;

        let mut accepted = Vec::new();
        if filtered.len() < 3 {
            return accepted;
        }

        for i in 1..filtered.len() - 1 {
            let slope = filtered[i] - filtered[i - 1];
            let index = base + i as u64;

            if filtered[i] > self.threshold_high
                && slope > self.slope_fraction * self.threshold_high
                && index - self.last_peak_index > self.min_peak_distance
            {
                accepted.push(index);
                self.last_peak_index = index;
            }
        }
        accepted
    }
}
