use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use slog::{warn, Logger};

use crate::log::create_logger;

#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    /// Shortest believable R-R interval; anything faster is noise.
    pub min_rr_interval: Duration,
    /// Plausible physiological BPM range, inclusive.
    pub hr_range: (f64, f64),
    /// Instantaneous BPM values kept for the median. Odd, so the median is a
    /// real element.
    pub history_len: usize,
    /// Consecutive refractory rejections tolerated before the estimator
    /// resets itself.
    pub max_noise_run: u32,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            min_rr_interval: Duration::from_millis(300),
            hr_range: (30.0, 220.0),
            history_len: 7,
            max_noise_run: 3,
        }
    }
}

#[derive(Debug, Default)]
struct HrState {
    history: VecDeque<f64>,
    last_peak_time: Option<Instant>,
    last_valid_hr: f64,
    noise_count: u32,
}

/// Turns accepted R-peak events into a smoothed BPM estimate.
///
/// Beats are timestamped with a monotonic clock as they are reported. The
/// published rate is the median of the recent instantaneous rates, so a
/// single missed or spurious beat cannot move it far. A run of impossibly
/// fast beats is taken as evidence of a corrupted timestamp baseline and
/// clears the whole state.
///
/// `update_r_peak` and `get_heart_rate` may be called from different
/// threads; one mutex guards everything mutable.
pub struct HeartRateEstimator {
    params: Parameters,
    state: Mutex<HrState>,
    log: Logger,
}

impl HeartRateEstimator {
    pub fn new(params: Parameters) -> Self {
        Self {
            params,
            state: Mutex::new(HrState::default()),
            log: create_logger("hr"),
        }
    }

    /// Register one accepted R-peak, timestamped now.
    pub fn update_r_peak(&self) {
        self.update_at(Instant::now());
    }

    pub(crate) fn update_at(&self, now: Instant) {
        let mut state = self.state.lock().unwrap();

        let last = match state.last_peak_time {
            Some(last) => last,
            None => {
                // first beat only establishes the time base
                state.last_peak_time = Some(now);
                return;
            }
        };

        let interval = now.saturating_duration_since(last);
        if interval < self.params.min_rr_interval {
            state.noise_count += 1;
            if state.noise_count > self.params.max_noise_run {
                warn!(self.log, "persistent refractory noise, resetting state";
                      "noise_count" => state.noise_count);
                *state = HrState::default();
            }
            return;
        }
        state.noise_count = 0;

        let bpm = 60.0 / interval.as_secs_f64();

        let (low, high) = self.params.hr_range;
        if (low..=high).contains(&bpm) {
            state.history.push_back(bpm);
            if state.history.len() > self.params.history_len {
                state.history.pop_front();
            }

            let mut sorted: Vec<f64> = state.history.iter().copied().collect();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
            state.last_valid_hr = sorted[sorted.len() / 2];
        }

        state.last_peak_time = Some(now);
    }

    /// Last known-good smoothed BPM, or 0.0 before any valid estimate exists.
    pub fn get_heart_rate(&self) -> f64 {
        self.state.lock().unwrap().last_valid_hr
    }

    /// Drop all accumulated state, including the published estimate.
    pub fn reset_state(&self) {
        *self.state.lock().unwrap() = HrState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(t0: Instant, millis: u64) -> Instant {
        t0 + Duration::from_millis(millis)
    }

    #[test]
    fn no_estimate_before_any_peak() {
        let est = HeartRateEstimator::new(Parameters::default());
        assert_eq!(est.get_heart_rate(), 0.0);
    }

    #[test]
    fn single_peak_gives_no_estimate() {
        let est = HeartRateEstimator::new(Parameters::default());
        est.update_at(Instant::now());
        assert_eq!(est.get_heart_rate(), 0.0);
    }

    #[test]
    fn one_second_interval_reads_sixty_bpm() {
        let est = HeartRateEstimator::new(Parameters::default());
        let t0 = Instant::now();
        est.update_at(t0);
        est.update_at(at(t0, 1000));
        assert!((est.get_heart_rate() - 60.0).abs() < 0.01);
    }

    #[test]
    fn refractory_interval_is_ignored() {
        let est = HeartRateEstimator::new(Parameters::default());
        let t0 = Instant::now();
        est.update_at(t0);
        est.update_at(at(t0, 1000));
        let before = est.get_heart_rate();

        est.update_at(at(t0, 1100));
        assert_eq!(est.get_heart_rate(), before);
    }

    #[test]
    fn noise_run_resets_the_estimator() {
        let est = HeartRateEstimator::new(Parameters::default());
        let t0 = Instant::now();
        est.update_at(t0);
        est.update_at(at(t0, 1000));
        assert!((est.get_heart_rate() - 60.0).abs() < 0.01);

        // four rejections in a row, all measured against the stuck baseline
        for millis in [1050, 1100, 1150, 1200] {
            est.update_at(at(t0, millis));
        }
        assert_eq!(est.get_heart_rate(), 0.0);

        // after the reset a single valid interval yields a one-element
        // median, not a blend with the stale history
        est.update_at(at(t0, 3000));
        est.update_at(at(t0, 3800));
        assert!((est.get_heart_rate() - 75.0).abs() < 0.01);
    }

    #[test]
    fn implausible_rate_is_rejected_but_timestamp_advances() {
        let est = HeartRateEstimator::new(Parameters::default());
        let t0 = Instant::now();
        est.update_at(t0);
        // 3 s interval, 20 BPM, below the plausible range
        est.update_at(at(t0, 3000));
        assert_eq!(est.get_heart_rate(), 0.0);

        // the rejected beat still moved the time base forward
        est.update_at(at(t0, 4000));
        assert!((est.get_heart_rate() - 60.0).abs() < 0.01);
    }

    #[test]
    fn median_smooths_an_outlier() {
        let est = HeartRateEstimator::new(Parameters::default());
        let t0 = Instant::now();
        est.update_at(t0);
        let mut now = 0;
        // steady 60 BPM with one shorter beat in the middle
        for interval in [1000, 1000, 900, 1000, 1000] {
            now += interval;
            est.update_at(at(t0, now));
        }
        let hr = est.get_heart_rate();
        assert!((hr - 60.0).abs() < 0.01, "median was {hr}");
    }

    #[test]
    fn reset_state_clears_everything() {
        let est = HeartRateEstimator::new(Parameters::default());
        let t0 = Instant::now();
        est.update_at(t0);
        est.update_at(at(t0, 1000));
        est.reset_state();
        assert_eq!(est.get_heart_rate(), 0.0);
    }
}
