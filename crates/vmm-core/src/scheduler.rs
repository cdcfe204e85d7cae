//! Scheduler worker (§4.10): the only periodic (not event-driven) worker.
//! Ticks on a fixed interval, folds the hard-fault delta into a
//! [`ConsumptionEstimator`](crate::stats::ConsumptionEstimator), and wakes
//! the trimmer early if standby is projected to run dry before the writer's
//! next batch would land.

use std::time::{Duration, Instant};

use crate::stats::ConsumptionEstimator;
use crate::VmSystem;

/// Default tick period. Short enough that the consumption estimate tracks a
/// bursty workload without dominating scheduler overhead.
const TICK_INTERVAL: Duration = Duration::from_millis(20);

pub struct Scheduler {
    estimator: ConsumptionEstimator,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            estimator: ConsumptionEstimator::new(),
        }
    }

    pub fn run(&mut self, vm: &VmSystem) {
        let mut last_tick = Instant::now();
        loop {
            if vm.events.system_exit().wait_timeout(TICK_INTERVAL) {
                return;
            }
            let elapsed = last_tick.elapsed();
            last_tick = Instant::now();
            self.tick(vm, elapsed);
        }
    }

    fn tick(&mut self, vm: &VmSystem, elapsed: Duration) {
        let hard_faults = vm.stats.n_hard.load(std::sync::atomic::Ordering::Relaxed);
        self.estimator.sample(hard_faults, elapsed);

        let standby_available = vm.standby_list.len();
        let writer_batch_seconds = vm.write_samples.estimated_time_for(vm.config.max_write_batch_size() as u64);

        if self.estimator.predicted_shortfall(standby_available, writer_batch_seconds) {
            vm.events.initiate_trimming().set();
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
