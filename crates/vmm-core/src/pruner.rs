//! Pruner worker (§4.9): demotes excess standby pages to the free lists.
//! The owning PTE is already on-disk form (the writer put it there), so
//! pruning a page is just detaching the PFN and handing it back — no PTE
//! rewrite is needed, unlike the writer's publish step.

use crate::event::{wait_any, WaitAnyResult};
use crate::VmSystem;

pub struct Pruner {
    next_shard: usize,
}

impl Pruner {
    pub fn new() -> Self {
        Self { next_shard: 0 }
    }

    pub fn run(&mut self, vm: &VmSystem) {
        loop {
            match wait_any(vm.events.initiate_pruning(), vm.events.system_exit()) {
                WaitAnyResult::Exit => return,
                WaitAnyResult::Active => {
                    vm.events.initiate_pruning().reset();
                    self.prune_to_floor(vm);
                }
            }
        }
    }

    /// Keeps `start_trimming_threshold` pages in standby as a soft-fault
    /// cache and redistributes the rest to the free-list shards. Shards
    /// below their low-water threshold (the free-list low bitmap) are
    /// refilled first; when no shard is currently marked low, falls back to
    /// round-robin so every shard still sees traffic.
    fn prune_to_floor(&mut self, vm: &VmSystem) {
        let floor = vm.config.start_trimming_threshold();
        let mut moved = 0u64;

        while vm.standby_list.len() > floor {
            let batch = vm
                .standby_list
                .remove_batch_from_head(&vm.pfn_table, crate::config::MAX_FREE_BATCH_SIZE, 0);
            if batch.is_empty() {
                break;
            }
            for pfn_index in batch {
                let pfn = vm.pfn_table.by_index(pfn_index);
                pfn.set_free();
                pfn.lock.release();
                let shard = vm.free_lists.lowest_shard().unwrap_or_else(|| {
                    let s = self.next_shard % vm.free_lists.num_shards();
                    self.next_shard = self.next_shard.wrapping_add(1);
                    s
                });
                vm.free_lists.give_to_shard(&vm.pfn_table, shard, pfn_index);
                vm.free_lists.clear_low(shard);
                moved += 1;
            }
        }

        if moved > 0 {
            vm.events.standby_pages_ready().set();
        }
    }
}

impl Default for Pruner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;

    fn system_with_standby_pages(n: usize) -> VmSystem {
        let cfg = VmConfig::new(1, 10, 64, 1024);
        let frames: Vec<u64> = (0..64).collect();
        let vm = VmSystem::new(cfg, &frames, crate::test_support::test_events());

        for i in 0..n {
            let frame_index = vm.free_lists.take_one_round_robin(&vm.pfn_table, 0, 0).unwrap();
            let pfn = vm.pfn_table.by_index(frame_index);
            pfn.lock.acquire();
            pfn.set_standby((i + 1) as u64);
            pfn.lock.release();
            vm.standby_list.insert_tail(&vm.pfn_table, frame_index);
        }
        vm
    }

    #[test]
    fn prune_demotes_excess_standby_pages_to_free() {
        let vm = system_with_standby_pages(20);
        let floor = vm.config.start_trimming_threshold();
        let mut pruner = Pruner::new();
        pruner.prune_to_floor(&vm);
        assert!(vm.standby_list.len() <= floor);
        assert_eq!(vm.free_lists.total_pages(), 64 - 20 + (20 - vm.standby_list.len()));
    }

    #[test]
    fn prune_refills_the_marked_low_shard_first() {
        let vm = system_with_standby_pages(20);
        vm.free_lists.take_one_round_robin(&vm.pfn_table, 0, u64::MAX);
        let low_shard = vm.free_lists.lowest_shard().expect("a shard should be marked low");

        let mut pruner = Pruner::new();
        pruner.prune_to_floor(&vm);

        assert_eq!(vm.free_lists.lowest_shard(), None);
        assert!(vm.free_lists.shard(low_shard).len() > 0);
    }

    #[test]
    fn prune_is_a_noop_when_standby_already_below_floor() {
        let vm = system_with_standby_pages(1);
        let mut pruner = Pruner::new();
        pruner.prune_to_floor(&vm);
        assert_eq!(vm.standby_list.len(), 1);
    }
}
