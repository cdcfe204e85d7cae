//! Global counters (§5, §4.10) plus the per-worker batch-sample ring buffer
//! ported from `examples/original_source/threads/threads.h`
//! (`sample_buffer`/`batch_sample`, `NUMBER_OF_SAMPLES = 512`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::{EWMA_SMOOTHING_FACTOR, NUMBER_OF_SAMPLES};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerRole {
    Trimming,
    Writing,
    Pruning,
    Scheduling,
    /// Not a dedicated worker in this implementation — aging is a policy
    /// flag the trimmer consults (§4.6), kept here only so log lines can
    /// name it the way the original's `AGING_THREAD_ID` does.
    Aging,
}

/// Global, process-wide counters. Every field is a single atomic word,
/// matching §5's "global counters are atomic single-word updates".
///
/// Per-list quiescent totals (available/modified/standby, §8 invariant 4)
/// are deliberately *not* duplicated here: [`crate::page_list::PageList`]
/// and [`crate::free_list::FreeListArray`] already maintain their own
/// authoritative length counters, and shadowing them in a second atomic
/// would only create a second place for the two to drift apart. The
/// statistics printer reads list lengths directly instead.
pub struct Stats {
    pub n_hard: AtomicU64,
    pub n_soft: AtomicU64,
    /// Cumulative time (nanoseconds) spent by hard-fault handlers waiting
    /// on `standby_pages_ready` (§8 scenario 5).
    pub wait_time_nanos: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            n_hard: AtomicU64::new(0),
            n_soft: AtomicU64::new(0),
            wait_time_nanos: AtomicU64::new(0),
        }
    }

    pub fn record_hard_fault(&self) {
        self.n_hard.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_soft_fault(&self) {
        self.n_soft.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_wait(&self, d: Duration) {
        self.wait_time_nanos
            .fetch_add(d.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn total_faults(&self) -> u64 {
        self.n_hard.load(Ordering::Relaxed) + self.n_soft.load(Ordering::Relaxed)
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchSample {
    pub batch_size: u64,
    pub time_in_seconds: f64,
}

/// Fixed-size circular buffer of recent batch samples for one worker role.
pub struct SampleBuffer {
    data: Mutex<RingState>,
}

struct RingState {
    samples: Vec<BatchSample>,
    head: usize,
    filled: usize,
    ewma_seconds_per_page: f64,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(RingState {
                samples: vec![BatchSample::default(); NUMBER_OF_SAMPLES],
                head: 0,
                filled: 0,
                ewma_seconds_per_page: 0.0,
            }),
        }
    }

    /// Records a completed batch and folds it into the running EWMA
    /// estimate with smoothing factor `EWMA_SMOOTHING_FACTOR`.
    pub fn push(&self, sample: BatchSample) {
        let mut state = self.data.lock().unwrap();
        let head = state.head;
        state.samples[head] = sample;
        state.head = (head + 1) % NUMBER_OF_SAMPLES;
        state.filled = (state.filled + 1).min(NUMBER_OF_SAMPLES);

        if sample.batch_size > 0 {
            let observed = sample.time_in_seconds / sample.batch_size as f64;
            state.ewma_seconds_per_page = if state.filled == 1 {
                observed
            } else {
                EWMA_SMOOTHING_FACTOR * observed
                    + (1.0 - EWMA_SMOOTHING_FACTOR) * state.ewma_seconds_per_page
            };
        }
    }

    /// Estimated seconds to process a batch of `batch_size` pages, derived
    /// from the EWMA of per-page time.
    pub fn estimated_time_for(&self, batch_size: u64) -> f64 {
        let state = self.data.lock().unwrap();
        state.ewma_seconds_per_page * batch_size as f64
    }

    pub fn sample_count(&self) -> usize {
        self.data.lock().unwrap().filled
    }
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks consumption rate (hard faults per second) between scheduler
/// ticks, feeding the "about to run low" predicate of §4.10.
pub struct ConsumptionEstimator {
    last_hard_count: AtomicU64,
    pages_consumed_per_second: Mutex<f64>,
}

impl ConsumptionEstimator {
    pub fn new() -> Self {
        Self {
            last_hard_count: AtomicU64::new(0),
            pages_consumed_per_second: Mutex::new(0.0),
        }
    }

    pub fn sample(&self, current_hard_count: u64, elapsed: Duration) {
        let prior = self.last_hard_count.swap(current_hard_count, Ordering::Relaxed);
        let delta = current_hard_count.saturating_sub(prior);
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);
        *self.pages_consumed_per_second.lock().unwrap() = delta as f64 / secs;
    }

    pub fn pages_per_second(&self) -> f64 {
        *self.pages_consumed_per_second.lock().unwrap()
    }

    /// §4.6's policy check: does the predicted standby shortfall over the
    /// writer's estimated batch time exceed what's available?
    pub fn predicted_shortfall(&self, standby_available: u64, writer_batch_seconds: f64) -> bool {
        let predicted_consumption = self.pages_per_second() * writer_batch_seconds;
        predicted_consumption > standby_available as f64
    }
}

impl Default for ConsumptionEstimator {
    fn default() -> Self {
        Self::new()
    }
}
