//! Core of a usermode virtual-memory manager simulator: the fault handler
//! and its supporting state machines (PTE/PFN tables, page lists, the
//! disk-slot allocator, and the trimmer/writer/pruner/scheduler background
//! workers).
//!
//! Everything outside this crate — the workload simulator, CLI argument
//! parsing, the concrete frame mapper, and performance counters — is an
//! external collaborator reached only through the [`frame_mapper::FrameMapper`]
//! trait and the plain data this crate exposes. See `vmm-sim` for those.

pub mod config;
pub mod disk;
pub mod error;
pub mod event;
pub mod fault_handler;
pub mod free_list;
pub mod frame_mapper;
pub mod memory;
pub mod page_list;
pub mod pfn;
pub mod pruner;
pub mod pte;
pub mod scheduler;
pub mod spinlock;
pub mod stats;
pub mod trimmer;
pub mod writer;

use config::VmConfig;
use disk::DiskBitmap;
use event::EventSet;
use free_list::FreeListArray;
use memory::PhysicalMemory;
use page_list::PageList;
use pfn::PfnTable;
use pte::PteTable;
use stats::{SampleBuffer, Stats};

/// The aggregate simulator state: PTE/PFN tables, page lists, the disk-slot
/// bitmap, statistics and events. One instance is constructed at startup
/// and torn down at shutdown; it is never lazily initialized piecemeal.
pub struct VmSystem {
    pub config: VmConfig,
    pub pte_table: PteTable,
    pub pfn_table: PfnTable,
    pub free_lists: FreeListArray,
    pub modified_list: PageList,
    pub standby_list: PageList,
    pub disk: DiskBitmap,
    pub memory: PhysicalMemory,
    pub stats: Stats,
    pub events: Box<dyn EventSet>,
    /// Recent writer-batch durations, consulted by the scheduler (§4.10) to
    /// predict whether standby will run dry before the next write batch lands.
    pub write_samples: SampleBuffer,
    pub trim_samples: SampleBuffer,
}

impl VmSystem {
    /// `allocated_frames` are the host-assigned physical frame numbers this
    /// process was granted (§6's `alloc_frames`); the PFN table covers
    /// exactly that contiguous range. `events` is the host's event bundle
    /// (§1) — an external collaborator, same as the frame mapper.
    pub fn new(config: VmConfig, allocated_frames: &[u64], events: Box<dyn EventSet>) -> Self {
        assert!(!allocated_frames.is_empty(), "no physical frames granted");
        let min_frame = *allocated_frames.iter().min().unwrap();
        let max_frame = *allocated_frames.iter().max().unwrap();
        assert_eq!(
            max_frame - min_frame + 1,
            allocated_frames.len() as u64,
            "allocated frames must form a contiguous range"
        );

        let pte_table = PteTable::new(0, config.va_span_pages());
        let pfn_table = PfnTable::new(min_frame, allocated_frames.len() as u64);
        let free_lists = FreeListArray::new(config.num_free_lists);
        let disk = DiskBitmap::new(config.num_page_file_pages);
        let memory = PhysicalMemory::new(allocated_frames.len() as u64);
        let stats = Stats::new();

        let all_indices: Vec<usize> = (0..pfn_table.len()).collect();
        free_lists.distribute(&pfn_table, &all_indices, 0);

        Self {
            config,
            pte_table,
            pfn_table,
            free_lists,
            modified_list: PageList::new(),
            standby_list: PageList::new(),
            disk,
            memory,
            stats,
            events,
            write_samples: SampleBuffer::new(),
            trim_samples: SampleBuffer::new(),
        }
    }

    pub fn base_va(&self) -> u64 {
        self.pte_table.base_va()
    }

    pub fn end_va(&self) -> u64 {
        self.pte_table.end_va()
    }

    /// Live free/active/modified/standby counts (§8 invariant 4), the way
    /// the original's `update_statistics` derives them fresh from each
    /// list's own size each time it is called rather than keeping a
    /// separately tracked running total.
    pub fn quiescent_counts(&self) -> QuiescentCounts {
        let total = self.pfn_table.len() as u64;
        let free = self.free_lists.total_pages();
        let modified = self.modified_list.len();
        let standby = self.standby_list.len();
        let active = total.saturating_sub(free + modified + standby);
        QuiescentCounts {
            total,
            free,
            active,
            modified,
            standby,
        }
    }
}

/// Snapshot of the four list populations plus the PFN-table total, as
/// consumed by the statistics printer (§6).
#[derive(Debug, Clone, Copy)]
pub struct QuiescentCounts {
    pub total: u64,
    pub free: u64,
    pub active: u64,
    pub modified: u64,
    pub standby: u64,
}

/// Shared test-only [`EventSet`] implementation: every unit test across
/// this crate needs a working event bundle to construct a [`VmSystem`], but
/// the real, `Condvar`-backed one lives in `vmm-sim` per the external-
/// collaborator split in `event.rs`'s module docs. `pub(crate)` so sibling
/// modules' `#[cfg(test)]` blocks can reach it via `crate::test_support`.
#[cfg(test)]
pub(crate) mod test_support {
    use crate::event::{EventSet, VmEvent};
    use std::sync::{Condvar, Mutex};
    use std::time::{Duration, Instant};

    pub(crate) struct TestEvent {
        state: Mutex<bool>,
        cv: Condvar,
    }

    impl TestEvent {
        fn new() -> Self {
            Self {
                state: Mutex::new(false),
                cv: Condvar::new(),
            }
        }
    }

    impl VmEvent for TestEvent {
        fn set(&self) {
            *self.state.lock().unwrap() = true;
            self.cv.notify_all();
        }

        fn reset(&self) {
            *self.state.lock().unwrap() = false;
        }

        fn is_set(&self) -> bool {
            *self.state.lock().unwrap()
        }

        fn wait(&self) {
            let mut signaled = self.state.lock().unwrap();
            while !*signaled {
                signaled = self.cv.wait(signaled).unwrap();
            }
        }

        fn wait_timeout(&self, timeout: Duration) -> bool {
            let deadline = Instant::now() + timeout;
            let mut signaled = self.state.lock().unwrap();
            while !*signaled {
                let now = Instant::now();
                if now >= deadline {
                    return false;
                }
                let (guard, result) = self.cv.wait_timeout(signaled, deadline - now).unwrap();
                signaled = guard;
                if result.timed_out() && !*signaled {
                    return false;
                }
            }
            true
        }
    }

    pub(crate) struct TestEvents {
        system_start: TestEvent,
        initiate_trimming: TestEvent,
        initiate_writing: TestEvent,
        initiate_pruning: TestEvent,
        standby_pages_ready: TestEvent,
        system_exit: TestEvent,
    }

    impl TestEvents {
        fn new() -> Self {
            Self {
                system_start: TestEvent::new(),
                initiate_trimming: TestEvent::new(),
                initiate_writing: TestEvent::new(),
                initiate_pruning: TestEvent::new(),
                standby_pages_ready: TestEvent::new(),
                system_exit: TestEvent::new(),
            }
        }
    }

    impl EventSet for TestEvents {
        fn system_start(&self) -> &dyn VmEvent {
            &self.system_start
        }
        fn initiate_trimming(&self) -> &dyn VmEvent {
            &self.initiate_trimming
        }
        fn initiate_writing(&self) -> &dyn VmEvent {
            &self.initiate_writing
        }
        fn initiate_pruning(&self) -> &dyn VmEvent {
            &self.initiate_pruning
        }
        fn standby_pages_ready(&self) -> &dyn VmEvent {
            &self.standby_pages_ready
        }
        fn system_exit(&self) -> &dyn VmEvent {
            &self.system_exit
        }
    }

    pub(crate) fn test_events() -> Box<dyn EventSet> {
        Box::new(TestEvents::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_system() -> VmSystem {
        let cfg = VmConfig::new(1, 10, 64, 1024);
        let frames: Vec<u64> = (0..64).collect();
        VmSystem::new(cfg, &frames, test_support::test_events())
    }

    #[test]
    fn new_system_starts_fully_free() {
        let vm = small_system();
        assert_eq!(vm.free_lists.total_pages(), 64);
        assert!(vm.modified_list.is_empty());
        assert!(vm.standby_list.is_empty());
    }

    #[test]
    fn va_span_matches_config() {
        let vm = small_system();
        assert_eq!(vm.end_va() - vm.base_va(), vm.config.va_span_bytes());
    }

    #[test]
    fn quiescent_counts_match_list_lengths_at_startup() {
        let vm = small_system();
        let counts = vm.quiescent_counts();
        assert_eq!(counts.total, 64);
        assert_eq!(counts.free, 64);
        assert_eq!(counts.active, 0);
        assert_eq!(counts.modified, 0);
        assert_eq!(counts.standby, 0);
    }

    #[test]
    fn quiescent_counts_reflect_a_frame_taken_out_of_free() {
        let vm = small_system();
        vm.free_lists.take_one_round_robin(&vm.pfn_table, 0, 0);
        let counts = vm.quiescent_counts();
        assert_eq!(counts.free, 63);
        assert_eq!(counts.free + counts.active + counts.modified + counts.standby, counts.total);
    }
}
