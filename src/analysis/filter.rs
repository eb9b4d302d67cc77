use ndarray::{Array1, ArrayView1};
use thiserror::Error;

/// Tap count of the 4th-order sections; both coefficient vectors must have
/// exactly this length.
pub const FILTER_TAPS: usize = 5;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("expected {expected} filter coefficients, got {got}")]
    CoefficientCount { expected: usize, got: usize },
    #[error("feedback coefficients must be normalized to a[0] = 1.0, got {0}")]
    NotNormalized(f64),
}

/// Causal 4th-order IIR filter with baseline-wander removal.
///
/// A slow exponential average tracks the baseline drift of the incoming
/// signal and is subtracted before the IIR stage, so the filter itself only
/// sees the AC component. All state, the baseline estimate included, is per
/// instance; independent filters never interact.
#[derive(Debug, Clone)]
pub struct IirFilter {
    b: [f64; FILTER_TAPS],
    a: [f64; FILTER_TAPS],
    // input/output histories, newest first
    x: [f64; FILTER_TAPS],
    y: [f64; FILTER_TAPS],
    baseline: f64,
    baseline_alpha: f64,
}

impl IirFilter {
    pub fn new(b: &[f64], a: &[f64], baseline_alpha: f64) -> Result<Self, ConfigError> {
        if b.len() != FILTER_TAPS {
            return Err(ConfigError::CoefficientCount {
                expected: FILTER_TAPS,
                got: b.len(),
            });
        }
        if a.len() != FILTER_TAPS {
            return Err(ConfigError::CoefficientCount {
                expected: FILTER_TAPS,
                got: a.len(),
            });
        }
        if a[0] != 1.0 {
            return Err(ConfigError::NotNormalized(a[0]));
        }

        let mut filter = Self {
            b: [0.0; FILTER_TAPS],
            a: [0.0; FILTER_TAPS],
            x: [0.0; FILTER_TAPS],
            y: [0.0; FILTER_TAPS],
            baseline: 0.0,
            baseline_alpha,
        };
        filter.b.copy_from_slice(b);
        filter.a.copy_from_slice(a);
        Ok(filter)
    }

    /// Run a batch through the filter. The output has the same length as the
    /// input and continues seamlessly from whatever was processed before.
    pub fn process(&mut self, input: ArrayView1<f64>) -> Array1<f64> {
        let mut output = Array1::zeros(input.len());
        for (out, &sample) in output.iter_mut().zip(input.iter()) {
            *out = self.step(sample);
        }
        output
    }

    fn step(&mut self, sample: f64) -> f64 {
        self.baseline = self.baseline_alpha * self.baseline + (1.0 - self.baseline_alpha) * sample;
        let sample = sample - self.baseline;

        self.x = [sample, self.x[0], self.x[1], self.x[2], self.x[3]];
        self.y = [0.0, self.y[0], self.y[1], self.y[2], self.y[3]];

        let mut acc = 0.0;
        for i in 0..FILTER_TAPS {
            acc += self.b[i] * self.x[i];
        }
        for i in 1..FILTER_TAPS {
            acc -= self.a[i] * self.y[i];
        }
        self.y[0] = acc;
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn test_filter() -> IirFilter {
        IirFilter::new(
            &[0.0034, 0.0, -0.0068, 0.0, 0.0034],
            &[1.0, -3.6789, 5.1797, -3.3058, 0.8060],
            0.995,
        )
        .unwrap()
    }

    #[test]
    fn rejects_wrong_coefficient_count() {
        let err = IirFilter::new(&[1.0, 0.0], &[1.0, 0.0], 0.995).unwrap_err();
        assert_eq!(err, ConfigError::CoefficientCount { expected: 5, got: 2 });

        let err = IirFilter::new(&[0.0; 5], &[2.0, 0.0, 0.0, 0.0, 0.0], 0.995).unwrap_err();
        assert_eq!(err, ConfigError::NotNormalized(2.0));
    }

    #[test]
    fn empty_input_is_a_no_op() {
        let mut filter = test_filter();
        let out = filter.process(ArrayView1::from(&[][..]));
        assert_eq!(out.len(), 0);

        // state must be untouched: a fresh filter produces the same output
        let probe = array![1.0, 0.5, -0.25, 0.0];
        assert_eq!(
            filter.process(probe.view()),
            test_filter().process(probe.view())
        );
    }

    #[test]
    fn deterministic_for_identical_input() {
        let input: Vec<f64> = (0..200).map(|i| (i as f64 * 0.1).sin()).collect();
        let a = test_filter().process(ArrayView1::from(&input[..]));
        let b = test_filter().process(ArrayView1::from(&input[..]));
        assert_eq!(a, b);
    }

    #[test]
    fn batching_does_not_change_the_output() {
        let input: Vec<f64> = (0..300).map(|i| (i as f64 * 0.07).cos() * 2.0).collect();

        let whole = test_filter().process(ArrayView1::from(&input[..]));

        let mut split_filter = test_filter();
        let mut split = Vec::new();
        for chunk in input.chunks(17) {
            split.extend(split_filter.process(ArrayView1::from(chunk)));
        }

        for (w, s) in whole.iter().zip(split.iter()) {
            assert!((w - s).abs() < 1e-12);
        }
    }
}
