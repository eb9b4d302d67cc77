//! Real-time heart-rate estimation from a streamed ECG channel.
//!
//! Scaled voltage samples arrive in arbitrary-sized batches via
//! [`EcgProcessor::add_samples`]; a single background thread filters them,
//! adapts detection thresholds over a sliding window of recent samples,
//! picks out R-peaks and feeds the accepted beats into a median-smoothed
//! BPM estimate, readable at any time through [`EcgProcessor::current_hr`].

pub mod analysis;
pub mod mock;
pub mod processing;

mod log;

pub use analysis::filter::{ConfigError, IirFilter};
pub use analysis::hr::HeartRateEstimator;
pub use processing::{EcgProcessor, Parameters};
