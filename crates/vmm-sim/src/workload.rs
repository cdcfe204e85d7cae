//! Synthetic access generator: each user thread repeatedly faults on a
//! pseudo-random virtual address within the reserved span, seeded
//! deterministically from the thread id so a run is reproducible.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

use vmm_core::config::PAGE_SIZE;
use vmm_core::fault_handler::{handle_fault, ThreadFaultContext};
use vmm_core::frame_mapper::FrameMapper;
use vmm_core::VmSystem;

pub struct Workload {
    rng: Pcg64,
}

impl Workload {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Pcg64::seed_from_u64(seed),
        }
    }

    fn next_va(&mut self, vm: &VmSystem) -> u64 {
        let page = self.rng.gen_range(0..vm.pte_table.len() as u64);
        vm.base_va() + page * PAGE_SIZE
    }

    /// Runs `iterations` faults through the shared fault handler, returning
    /// the number that resolved without error (an out-of-range VA from a
    /// misconfigured span is the only error case and never happens here
    /// since every VA comes from the table's own length).
    pub fn run(
        &mut self,
        vm: &VmSystem,
        mapper: &dyn FrameMapper,
        ctx: &mut ThreadFaultContext,
        iterations: u64,
    ) -> u64 {
        let mut resolved = 0u64;
        for _ in 0..iterations {
            let va = self.next_va(vm);
            if handle_fault(vm, mapper, ctx, va).is_ok() {
                resolved += 1;
            }
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Events;
    use crate::frame_mapper::SimFrameMapper;
    use vmm_core::config::VmConfig;

    #[test]
    fn workload_resolves_every_access() {
        let cfg = VmConfig::new(1, 100, 64, 1024);
        let mapper = SimFrameMapper::new(64);
        let frames = mapper.alloc_frames(64);
        let vm = VmSystem::new(cfg, &frames, Box::new(Events::new()));
        let mut ctx = ThreadFaultContext::new(0, vm.config.num_free_lists, vm.end_va());
        let mut workload = Workload::new(42);

        let resolved = workload.run(&vm, &mapper, &mut ctx, 200);
        assert_eq!(resolved, 200);
        assert!(vm.stats.total_faults() > 0);
    }
}
