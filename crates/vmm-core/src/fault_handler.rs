//! Per-user-thread fault handler (§4.8): the only entry point user threads
//! call. Classifies the fault against the PTE and resolves it either
//! softly (re-map a transition frame) or hard (acquire a fresh frame,
//! optionally reading swap).

use std::sync::atomic::Ordering;
use std::time::Instant;

use crate::config::NUM_KERNEL_READ_ADDRESSES;
use crate::error::VmResult;
use crate::frame_mapper::{FrameMapper, ScatterEntry};
use crate::free_list::ThreadFreeCache;
use crate::pfn::PfnState;
use crate::pte::PteForm;
use crate::VmSystem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// A concurrent resolver raced us; the PTE was already valid.
    AlreadyValid,
    SoftFault,
    HardFaultFromDisk,
    HardFaultZeroed,
}

/// Per-thread kernel scratch VA pool with delayed, batched unmap (§4.8
/// step 5, SPEC_FULL "Per-thread kernel scratch VA pool").
pub struct KernelScratch {
    thread_id: u32,
    base_va: u64,
    index: usize,
}

impl KernelScratch {
    pub fn new(thread_id: u32, base_va: u64) -> Self {
        Self {
            thread_id,
            base_va,
            index: 0,
        }
    }

    fn pool_base(&self) -> u64 {
        self.base_va + self.thread_id as u64 * NUM_KERNEL_READ_ADDRESSES as u64 * crate::config::PAGE_SIZE
    }

    fn slot_va(&self, slot: usize) -> u64 {
        self.pool_base() + slot as u64 * crate::config::PAGE_SIZE
    }

    pub fn current_va(&self) -> u64 {
        self.slot_va(self.index)
    }

    /// Advances past the slot just used; once the pool is exhausted,
    /// unmaps every entry in one scatter call and resets.
    pub fn advance(&mut self, mapper: &dyn FrameMapper) {
        self.index += 1;
        if self.index >= NUM_KERNEL_READ_ADDRESSES {
            let entries: Vec<ScatterEntry> = (0..NUM_KERNEL_READ_ADDRESSES)
                .map(|slot| ScatterEntry {
                    va: self.slot_va(slot),
                    frame: None,
                })
                .collect();
            mapper.map_scatter(&entries);
            self.index = 0;
        }
    }
}

/// Everything a single user thread carries across fault-handler calls.
pub struct ThreadFaultContext {
    pub thread_id: u32,
    pub free_cache: ThreadFreeCache,
    pub kernel_scratch: KernelScratch,
    start_shard: usize,
}

impl ThreadFaultContext {
    pub fn new(thread_id: u32, num_shards: usize, kernel_va_base: u64) -> Self {
        Self {
            thread_id,
            free_cache: ThreadFreeCache::new(),
            kernel_scratch: KernelScratch::new(thread_id, kernel_va_base),
            start_shard: thread_id as usize % num_shards.max(1),
        }
    }
}

/// Entry point: `(faulting_va, thread_ctx)` of §4.8.
pub fn handle_fault(
    vm: &VmSystem,
    mapper: &dyn FrameMapper,
    ctx: &mut ThreadFaultContext,
    faulting_va: u64,
) -> VmResult<FaultOutcome> {
    let (pte, pte_index) = vm.pte_table.pte_for_va(faulting_va)?;

    loop {
        match pte.form() {
            PteForm::Valid { .. } => return Ok(FaultOutcome::AlreadyValid),

            PteForm::Transition { .. } => {
                pte.lock.acquire();
                let frame = match pte.form() {
                    PteForm::Transition { frame } => frame,
                    _ => {
                        // Someone else resolved it between our check and the lock.
                        pte.lock.release();
                        continue;
                    }
                };

                let pfn_index = vm.pfn_table.index_of_frame(frame);
                let pfn = vm.pfn_table.by_index(pfn_index);
                pfn.lock.acquire();

                if pte.is_on_disk() {
                    // Stolen by a hard fault between our two locks (§4.8 case B step 3).
                    pfn.lock.release();
                    pte.lock.release();
                    continue;
                }

                match pfn.state() {
                    PfnState::Modified => {
                        vm.modified_list.remove_in_middle(&vm.pfn_table, pfn_index);
                    }
                    PfnState::Standby => {
                        vm.standby_list.remove_in_middle(&vm.pfn_table, pfn_index);
                        vm.disk.clear(pfn.disk_slot());
                    }
                    PfnState::MidTrim => {
                        pfn.soft_fault_mid_trim.store(true, Ordering::Relaxed);
                    }
                    PfnState::MidWrite => {
                        pfn.soft_fault_mid_write.store(true, Ordering::Relaxed);
                    }
                    other => panic!("transition PTE referencing PFN in state {other:?}"),
                }

                mapper.map(faulting_va, Some(frame));
                pfn.set_active(pte_index);
                pte.set_valid(frame);

                pfn.lock.release();
                pte.lock.release();
                vm.stats.record_soft_fault();
                return Ok(FaultOutcome::SoftFault);
            }

            PteForm::OnDisk { .. } | PteForm::Zeroed => {
                let pfn_index = acquire_free_frame(vm, ctx)?;
                let pfn = vm.pfn_table.by_index(pfn_index);
                pfn.lock.acquire();

                pte.lock.acquire();
                let outcome = match pte.form() {
                    PteForm::OnDisk { slot } => Some((Some(slot), FaultOutcome::HardFaultFromDisk)),
                    PteForm::Zeroed => Some((None, FaultOutcome::HardFaultZeroed)),
                    _ => None,
                };
                let Some((slot, outcome)) = outcome else {
                    // Someone else resolved it first; give the frame back.
                    pte.lock.release();
                    pfn.lock.release();
                    return_frame(vm, ctx, pfn_index);
                    continue;
                };

                let frame = vm.pfn_table.frame_of(pfn_index);
                let scratch_va = ctx.kernel_scratch.current_va();
                mapper.map_scatter(&[
                    ScatterEntry {
                        va: scratch_va,
                        frame: Some(frame),
                    },
                    ScatterEntry {
                        va: faulting_va,
                        frame: Some(frame),
                    },
                ]);

                match slot {
                    Some(slot) => {
                        let bytes = vm.disk.page_file_bytes(slot).to_vec();
                        vm.memory.frame_mut(pfn_index).copy_from_slice(&bytes);
                        vm.disk.clear(slot);
                    }
                    None => {
                        vm.memory.frame_mut(pfn_index).fill(0);
                    }
                }

                pte.set_valid(frame);
                pfn.set_active(pte_index);
                pte.lock.release();
                pfn.lock.release();

                ctx.kernel_scratch.advance(mapper);
                vm.stats.record_hard_fault();
                return Ok(outcome);
            }
        }
    }
}

/// §4.8 case C step 1: thread cache, then free shards, then standby,
/// then wait-and-retry.
fn acquire_free_frame(vm: &VmSystem, ctx: &mut ThreadFaultContext) -> VmResult<usize> {
    loop {
        if let Some(frame) = ctx.free_cache.pop() {
            return Ok(frame);
        }

        if let Some(frame) =
            vm.free_lists
                .take_one_round_robin(&vm.pfn_table, ctx.start_shard, vm.config.start_trimming_threshold())
        {
            return Ok(frame);
        }

        if let Some(frame) = pull_standby_batch(vm, ctx) {
            return Ok(frame);
        }

        vm.events.standby_pages_ready().reset();
        vm.events.initiate_trimming().set();
        let started = Instant::now();
        vm.events.standby_pages_ready().wait();
        vm.stats.record_wait(started.elapsed());
    }
}

/// Detaches a small batch from the standby list's head and refills the
/// thread's free cache from it, returning the first frame for immediate use.
fn pull_standby_batch(vm: &VmSystem, ctx: &mut ThreadFaultContext) -> Option<usize> {
    let capacity = crate::config::FREE_PAGE_CACHE_SIZE.min(64);
    let batch = vm.standby_list.remove_batch_from_head(&vm.pfn_table, capacity, 0);
    if batch.is_empty() {
        return None;
    }
    for &frame in &batch {
        let pfn = vm.pfn_table.by_index(frame);
        pfn.set_free();
        pfn.lock.release();
    }
    let mut iter = batch.into_iter();
    let first = iter.next();
    for frame in iter {
        if !ctx.free_cache.is_full() {
            ctx.free_cache.push(frame);
        } else {
            vm.free_lists.give_to_shard(&vm.pfn_table, ctx.start_shard, frame);
        }
    }
    first
}

fn return_frame(vm: &VmSystem, ctx: &ThreadFaultContext, frame: usize) {
    vm.free_lists.give_to_shard(&vm.pfn_table, ctx.start_shard, frame);
}
