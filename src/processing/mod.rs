//! The real-time pipeline: ingestion hand-off, the background processing
//! thread, and R-peak detection driving the heart-rate estimate.

pub mod detector;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use ndarray::ArrayView1;
use slog::{debug, info, warn, Logger};

use crate::analysis::filter::{ConfigError, IirFilter};
use crate::analysis::hr::{self, HeartRateEstimator};
use crate::log::create_logger;
use detector::RPeakDetector;

#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    /// Nominal sample rate of the source, used to size the analysis window.
    pub sample_rate: usize,
    /// Duration of the sliding analysis window.
    pub window_seconds: usize,
    /// Feedforward IIR coefficients, 5 elements.
    pub filter_b: Vec<f64>,
    /// Feedback IIR coefficients, 5 elements, a[0] = 1.0.
    pub filter_a: Vec<f64>,
    /// Baseline drift tracker weight.
    pub baseline_alpha: f64,
    /// Slow EMA weight for the noise floor.
    pub noise_smoothing: f64,
    /// Fast EMA weight for the signal peak amplitude.
    pub signal_smoothing: f64,
    /// Position of threshold_low between noise and signal peaks.
    pub threshold_fraction: f64,
    /// threshold_high as a fraction of the signal peak.
    pub high_fraction: f64,
    /// Required slope as a fraction of threshold_high.
    pub slope_fraction: f64,
    /// Refractory distance between accepted peaks, in samples.
    pub min_peak_distance: u64,
    /// Ingestion queue bound, in batches. Overflowing batches are dropped.
    pub queue_capacity: usize,
    pub hr: hr::Parameters,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            sample_rate: 250,
            window_seconds: 2,
            // 4th-order bandpass tuned for the QRS band
            filter_b: vec![0.0034, 0.0, -0.0068, 0.0, 0.0034],
            filter_a: vec![1.0, -3.6789, 5.1797, -3.3058, 0.8060],
            baseline_alpha: 0.995,
            noise_smoothing: 0.95,
            signal_smoothing: 0.3,
            threshold_fraction: 0.35,
            high_fraction: 0.6,
            slope_fraction: 0.3,
            min_peak_distance: 30,
            queue_capacity: 64,
            hr: hr::Parameters::default(),
        }
    }
}

struct Worker {
    tx: SyncSender<Vec<f64>>,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Owns the single background processing thread and everything it drives.
///
/// Producers hand sample batches to [`add_samples`](Self::add_samples)
/// through a bounded channel and never block; the worker drains the channel,
/// filters, maintains the sliding window, updates the thresholds and reports
/// accepted R-peaks to the estimator. [`current_hr`](Self::current_hr) can be
/// polled from any thread at any time.
pub struct EcgProcessor {
    params: Parameters,
    filter: IirFilter,
    estimator: Arc<HeartRateEstimator>,
    worker: Mutex<Option<Worker>>,
    log: Logger,
}

impl EcgProcessor {
    /// Fails fast on malformed filter coefficients; nothing else can fail.
    pub fn new(params: Parameters) -> Result<Self, ConfigError> {
        let filter = IirFilter::new(&params.filter_b, &params.filter_a, params.baseline_alpha)?;
        let estimator = Arc::new(HeartRateEstimator::new(params.hr.clone()));
        Ok(Self {
            params,
            filter,
            estimator,
            worker: Mutex::new(None),
            log: create_logger("processing"),
        })
    }

    /// Spawn the processing thread. A second call while running is ignored.
    /// Restarting after [`stop`](Self::stop) begins with a clean filter,
    /// window and detector.
    pub fn start(&self) {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_some() {
            warn!(self.log, "start called while already running");
            return;
        }

        let (tx, rx) = sync_channel(self.params.queue_capacity);
        let stop = Arc::new(AtomicBool::new(false));

        let filter = self.filter.clone();
        let window_capacity = self.params.sample_rate * self.params.window_seconds;
        let detector = RPeakDetector::new(&self.params);
        let estimator = Arc::clone(&self.estimator);
        let log = self.log.clone();
        let thread_stop = Arc::clone(&stop);

        let handle = std::thread::spawn(move || {
            processing_loop(
                rx,
                thread_stop,
                filter,
                window_capacity,
                detector,
                estimator,
                log,
            )
        });

        info!(self.log, "processing thread started");
        *worker = Some(Worker { tx, stop, handle });
    }

    /// Cooperative shutdown: raise the stop flag, wake the worker and join
    /// it. Idempotent.
    pub fn stop(&self) {
        let worker = self.worker.lock().unwrap().take();
        let Some(Worker { tx, stop, handle }) = worker else {
            return;
        };

        stop.store(true, Ordering::Release);
        // disconnecting the channel is the unconditional wake-up
        drop(tx);
        if handle.join().is_err() {
            warn!(self.log, "processing thread panicked");
        }
        info!(self.log, "processing thread stopped");
    }

    /// Queue one batch for processing. Never blocks beyond the brief lock
    /// hold; if the worker has fallen behind far enough to fill the queue,
    /// the batch is dropped.
    pub fn add_samples(&self, samples: &[f64]) {
        if samples.is_empty() {
            return;
        }
        let worker = self.worker.lock().unwrap();
        let Some(w) = worker.as_ref() else {
            warn!(self.log, "samples dropped, processor not running");
            return;
        };

        match w.tx.try_send(samples.to_vec()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(self.log, "ingestion queue full, dropping batch"; "len" => samples.len());
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Last known-good smoothed BPM, 0.0 before any valid estimate exists.
    pub fn current_hr(&self) -> f64 {
        self.estimator.get_heart_rate()
    }

    /// The estimator shared with the processing thread, e.g. to reset it
    /// between wearers.
    pub fn estimator(&self) -> &HeartRateEstimator {
        &self.estimator
    }
}

impl Drop for EcgProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn processing_loop(
    rx: Receiver<Vec<f64>>,
    stop: Arc<AtomicBool>,
    mut filter: IirFilter,
    window_capacity: usize,
    mut detector: RPeakDetector,
    estimator: Arc<HeartRateEstimator>,
    log: Logger,
) {
    let mut window: Vec<f64> = Vec::with_capacity(window_capacity);

    while let Some(batch) = fetch_batch(&rx, &stop) {
        let filtered = filter.process(ArrayView1::from(&batch[..]));

        window.extend(filtered.iter());
        if window.len() > window_capacity {
            let excess = window.len() - window_capacity;
            window.drain(..excess);
        }

        detector.update_thresholds(&window);

        for index in detector.detect(filtered.view()) {
            debug!(log, "R-peak accepted"; "index" => index);
            estimator.update_r_peak();
        }
    }
}

/// Block until at least one batch is pending, then take everything queued so
/// far as one contiguous batch. Returns `None` once stopping.
fn fetch_batch(rx: &Receiver<Vec<f64>>, stop: &AtomicBool) -> Option<Vec<f64>> {
    let mut batch = rx.recv().ok()?;
    if stop.load(Ordering::Acquire) {
        return None;
    }
    while let Ok(more) = rx.try_recv() {
        batch.extend(more);
    }
    Some(batch)
}
