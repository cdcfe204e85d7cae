//! Writer worker (§4.7): flushes modified pages to disk and republishes
//! them on the standby list. Holds the sole [`WriterStash`] instance,
//! which is how "the writer is the only thread that sets disk bits" (§9a)
//! becomes a property of the type rather than a convention.

use std::sync::atomic::Ordering;
use std::time::Instant;

use crate::disk::WriterStash;
use crate::event::{wait_any, WaitAnyResult};
use crate::page_list::PageList;
use crate::pfn::PfnState;
use crate::pte::PteForm;
use crate::stats::BatchSample;
use crate::VmSystem;

pub struct Writer {
    stash: WriterStash,
}

impl Writer {
    pub fn new() -> Self {
        Self {
            stash: WriterStash::new(),
        }
    }

    pub fn run(&mut self, vm: &VmSystem) {
        loop {
            match wait_any(vm.events.initiate_writing(), vm.events.system_exit()) {
                WaitAnyResult::Exit => return,
                WaitAnyResult::Active => {
                    vm.events.initiate_writing().reset();
                    self.write_batch(vm);
                }
            }
        }
    }

    /// Drains up to `max_write_batch_size` modified pages, writes each to a
    /// freshly stashed disk slot, and republishes survivors on standby in
    /// one splice. Each PFN's own lock stays held from the moment it comes
    /// back from `remove_batch_from_head` until after that splice, the same
    /// discipline the trimmer uses for its batch.
    fn write_batch(&mut self, vm: &VmSystem) {
        let capacity = vm.config.max_write_batch_size().max(crate::config::MIN_WRITE_BATCH_SIZE);
        let batch = vm.modified_list.remove_batch_from_head(&vm.pfn_table, capacity, 0);
        if batch.is_empty() {
            return;
        }
        let batch_len = batch.len();
        let started = Instant::now();

        self.stash.stash_slots(&vm.disk, batch_len);
        let mut slots = Vec::with_capacity(batch_len);

        for &pfn_index in &batch {
            let pfn = vm.pfn_table.by_index(pfn_index);
            // Node arrives from `remove_batch_from_head` already locked.
            let slot = self.stash.pop_stashed();
            pfn.set_mid_write();
            slots.push(slot);

            let bytes = vm.memory.frame(pfn_index).to_vec();
            vm.disk.page_file_bytes_mut(slot).copy_from_slice(&bytes);
        }

        let publish_list = PageList::new();
        let mut survivors = Vec::with_capacity(batch_len);

        for (&pfn_index, &slot) in batch.iter().zip(slots.iter()) {
            let pfn = vm.pfn_table.by_index(pfn_index);
            let stolen = pfn.soft_fault_mid_write.load(Ordering::Relaxed);
            if stolen || pfn.state() != PfnState::MidWrite {
                pfn.lock.release();
                vm.disk.clear(slot);
                continue;
            }

            let Some(pte_index) = pfn.pte_index() else {
                pfn.lock.release();
                vm.disk.clear(slot);
                continue;
            };
            let pte = vm.pte_table.index_of(pte_index);
            pte.lock.acquire();
            match pte.form() {
                PteForm::Transition { .. } => pte.set_on_disk(slot),
                _ => {
                    // Raced with something that already moved the PTE on.
                    pte.lock.release();
                    pfn.lock.release();
                    vm.disk.clear(slot);
                    continue;
                }
            }
            pte.lock.release();
            pfn.set_standby(slot);
            publish_list.insert_tail(&vm.pfn_table, pfn_index);
            survivors.push(pfn_index);
        }
        vm.standby_list.splice_tail(&vm.pfn_table, &publish_list);

        for &pfn_index in &survivors {
            vm.pfn_table.by_index(pfn_index).lock.release();
        }
        let published = survivors.len() as u64;

        self.stash.drain_clear(&vm.disk);
        vm.write_samples.push(BatchSample {
            batch_size: batch_len as u64,
            time_in_seconds: started.elapsed().as_secs_f64(),
        });

        if published > 0 {
            vm.events.standby_pages_ready().set();
            if vm.standby_list.len() >= vm.config.start_trimming_threshold() {
                vm.events.initiate_pruning().set();
            }
        }
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;
    use crate::pfn::NIL;

    fn system_with_modified_page() -> VmSystem {
        let cfg = VmConfig::new(1, 10, 64, 1024);
        let frames: Vec<u64> = (0..64).collect();
        let vm = VmSystem::new(cfg, &frames, crate::test_support::test_events());

        let va = vm.base_va();
        let (pte, pte_index) = vm.pte_table.pte_for_va(va).unwrap();
        let frame_index = vm.free_lists.take_one_round_robin(&vm.pfn_table, 0, 0).unwrap();
        pte.set_valid(vm.pfn_table.frame_of(frame_index));
        vm.pfn_table.by_index(frame_index).set_active(pte_index);

        pte.lock.acquire();
        pte.set_transition();
        pte.lock.release();
        let pfn = vm.pfn_table.by_index(frame_index);
        pfn.lock.acquire();
        pfn.set_modified();
        pfn.lock.release();
        vm.modified_list.insert_tail(&vm.pfn_table, frame_index);
        vm
    }

    #[test]
    fn write_batch_publishes_to_standby() {
        let vm = system_with_modified_page();
        let mut writer = Writer::new();
        writer.write_batch(&vm);
        assert!(vm.modified_list.is_empty());
        assert_eq!(vm.standby_list.len(), 1);
    }

    #[test]
    fn write_batch_leaves_matching_on_disk_pte() {
        let vm = system_with_modified_page();
        let mut writer = Writer::new();
        writer.write_batch(&vm);

        let node = vm.standby_list.to_vec(&vm.pfn_table)[0];
        let pfn = vm.pfn_table.by_index(node);
        let pte_index = pfn.pte_index().expect("standby pfn must still reference its pte");
        assert_ne!(pte_index, NIL);
        let pte = vm.pte_table.index_of(pte_index);
        assert_eq!(pte.form(), PteForm::OnDisk { slot: pfn.disk_slot() });
    }

    #[test]
    fn write_batch_on_empty_modified_list_is_a_noop() {
        let cfg = VmConfig::new(1, 10, 64, 1024);
        let frames: Vec<u64> = (0..64).collect();
        let vm = VmSystem::new(cfg, &frames, crate::test_support::test_events());
        let mut writer = Writer::new();
        writer.write_batch(&vm);
        assert!(vm.standby_list.is_empty());
    }
}
