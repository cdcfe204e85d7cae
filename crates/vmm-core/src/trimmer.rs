//! Trimmer worker (§4.6): steals active pages back from user threads and
//! moves them onto the modified list so the writer can eventually flush
//! them to disk. Runs on `initiate_trimming`, wakes the writer once enough
//! pages have queued up.

use std::sync::atomic::Ordering;
use std::time::Instant;

use crate::event::{wait_any, WaitAnyResult};
use crate::frame_mapper::{FrameMapper, ScatterEntry};
use crate::page_list::PageList;
use crate::pfn::PfnState;
use crate::pte::PteForm;
use crate::stats::BatchSample;
use crate::VmSystem;

/// Round-robin cursor over the PFN table. Owned by the single trimmer
/// thread, so a plain `usize` is enough — no atomics needed.
pub struct Trimmer {
    cursor: usize,
}

impl Trimmer {
    pub fn new() -> Self {
        Self { cursor: 0 }
    }

    /// The worker's main loop. Returns once `system_exit` is observed.
    pub fn run(&mut self, vm: &VmSystem, mapper: &dyn FrameMapper) {
        loop {
            match wait_any(vm.events.initiate_trimming(), vm.events.system_exit()) {
                WaitAnyResult::Exit => return,
                WaitAnyResult::Active => {
                    vm.events.initiate_trimming().reset();
                    self.trim_until_threshold(vm, mapper);
                }
            }
        }
    }

    fn active_page_estimate(&self, vm: &VmSystem) -> u64 {
        let total = vm.pfn_table.len() as u64;
        let free = vm.free_lists.total_pages();
        let standby = vm.standby_list.len();
        let modified = vm.modified_list.len();
        total.saturating_sub(free + standby + modified)
    }

    /// Trims batches until the active-page estimate drops to the §4 stop
    /// threshold, or a batch pass makes no further progress.
    fn trim_until_threshold(&mut self, vm: &VmSystem, mapper: &dyn FrameMapper) {
        let threshold = vm.config.active_page_threshold();
        let started = Instant::now();
        let mut trimmed_total = 0u64;

        while self.active_page_estimate(vm) > threshold {
            let published = self.trim_batch(vm, mapper, crate::config::MAX_TRIM_BATCH_SIZE);
            if published == 0 {
                break;
            }
            trimmed_total += published;
        }

        if trimmed_total > 0 {
            vm.trim_samples.push(BatchSample {
                batch_size: trimmed_total,
                time_in_seconds: started.elapsed().as_secs_f64(),
            });
        }

        if vm.modified_list.len() >= vm.config.begin_writing_threshold() {
            vm.events.initiate_writing().set();
        }
    }

    /// One pass of §4.6's five-step batch algorithm: scan up to
    /// `MAX_TRIM_ATTEMPTS` candidates to assemble a batch of at most
    /// `capacity` active pages, record each one's `(pfn, va)`, unmap the
    /// whole batch in a single scatter call, then splice survivors (pages
    /// not soft-fault-stolen mid-trim) onto the modified list in one
    /// operation. Every selected PFN's lock is held continuously from
    /// selection through the final unlock loop at the bottom, matching the
    /// original's `trim_pages()` — nothing is ever re-locked mid-batch.
    fn trim_batch(&mut self, vm: &VmSystem, mapper: &dyn FrameMapper, capacity: usize) -> u64 {
        let len = vm.pfn_table.len();
        if len == 0 || capacity == 0 {
            return 0;
        }

        let mut batch: Vec<(usize, u64)> = Vec::with_capacity(capacity);
        let mut scanned = 0usize;

        while batch.len() < capacity && scanned < crate::config::MAX_TRIM_ATTEMPTS {
            scanned += 1;
            let frame_index = self.cursor;
            self.cursor = (self.cursor + 1) % len;

            let pfn = vm.pfn_table.by_index(frame_index);
            if !pfn.lock.try_acquire() {
                continue;
            }
            if pfn.state() != PfnState::Active {
                pfn.lock.release();
                continue;
            }
            let Some(pte_index) = pfn.pte_index() else {
                pfn.lock.release();
                continue;
            };
            let pte = vm.pte_table.index_of(pte_index);
            if !pte.lock.try_acquire() {
                pfn.lock.release();
                continue;
            }
            if !matches!(pte.form(), PteForm::Valid { .. }) {
                // Raced with a fault or another trimmer pass.
                pte.lock.release();
                pfn.lock.release();
                continue;
            }

            pte.set_transition();
            pfn.set_mid_trim();
            pte.lock.release();
            // The PFN's own lock stays held; see the doc comment above.
            batch.push((frame_index, vm.pte_table.va_of(pte_index)));
        }

        if batch.is_empty() {
            return 0;
        }

        let entries: Vec<ScatterEntry> = batch
            .iter()
            .map(|&(_, va)| ScatterEntry { va, frame: None })
            .collect();
        mapper.map_scatter(&entries);

        let publish_list = PageList::new();
        let mut survivors = Vec::with_capacity(batch.len());
        for &(frame_index, _) in &batch {
            let pfn = vm.pfn_table.by_index(frame_index);
            let stolen = pfn.soft_fault_mid_trim.load(Ordering::Relaxed);
            if stolen || pfn.state() != PfnState::MidTrim {
                pfn.lock.release();
                continue;
            }
            pfn.set_modified();
            publish_list.insert_tail(&vm.pfn_table, frame_index);
            survivors.push(frame_index);
        }
        vm.modified_list.splice_tail(&vm.pfn_table, &publish_list);

        for frame_index in &survivors {
            vm.pfn_table.by_index(*frame_index).lock.release();
        }

        survivors.len() as u64
    }
}

impl Default for Trimmer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;

    struct NullMapper;
    impl FrameMapper for NullMapper {
        fn alloc_frames(&self, _count: usize) -> Vec<u64> {
            Vec::new()
        }
        fn free_frames(&self, _frames: &[u64]) {}
        fn map(&self, _va: u64, _frame: Option<u64>) {}
        fn map_scatter(&self, _entries: &[ScatterEntry]) {}
    }

    fn system_with_active_pages(n: usize) -> VmSystem {
        let cfg = VmConfig::new(1, 10, 64, 1024);
        let frames: Vec<u64> = (0..64).collect();
        let vm = VmSystem::new(cfg, &frames, crate::test_support::test_events());
        for i in 0..n {
            let va = vm.base_va() + i as u64 * crate::config::PAGE_SIZE;
            let (pte, _) = vm.pte_table.pte_for_va(va).unwrap();
            let frame = vm.free_lists.take_one_round_robin(&vm.pfn_table, 0, 0).unwrap();
            pte.set_valid(vm.pfn_table.frame_of(frame));
            vm.pfn_table.by_index(frame).set_active(
                vm.pte_table.pte_for_va(va).unwrap().1,
            );
        }
        vm
    }

    #[test]
    fn trim_batch_moves_active_pages_to_modified() {
        let vm = system_with_active_pages(3);
        let mapper = NullMapper;
        let mut trimmer = Trimmer::new();
        let published = trimmer.trim_batch(&vm, &mapper, 8);
        assert_eq!(published, 3);
        assert_eq!(vm.modified_list.len(), 3);
    }

    #[test]
    fn trim_batch_caps_at_requested_capacity() {
        let vm = system_with_active_pages(10);
        let mapper = NullMapper;
        let mut trimmer = Trimmer::new();
        let published = trimmer.trim_batch(&vm, &mapper, 4);
        assert_eq!(published, 4);
        assert_eq!(vm.modified_list.len(), 4);
    }

    #[test]
    fn trim_until_threshold_stops_at_configured_ratio() {
        let vm = system_with_active_pages(60);
        let mapper = NullMapper;
        let mut trimmer = Trimmer::new();
        trimmer.trim_until_threshold(&vm, &mapper);
        assert!(trimmer.active_page_estimate(&vm) <= vm.config.active_page_threshold() + 1);
    }
}
