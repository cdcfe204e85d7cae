//! Concrete [`FrameMapper`] for the simulator: no real hardware to program,
//! so "allocating a frame" is handing out the next index from a fixed pool
//! and "mapping" is bookkeeping in a table the workload can assert against.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use vmm_core::frame_mapper::{FrameMapper, ScatterEntry};

pub struct SimFrameMapper {
    next_frame: AtomicU64,
    total_frames: u64,
    mappings: Mutex<std::collections::HashMap<u64, u64>>,
}

impl SimFrameMapper {
    pub fn new(total_frames: u64) -> Self {
        Self {
            next_frame: AtomicU64::new(0),
            total_frames,
            mappings: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Number of VAs currently mapped to a frame; exposed for tests and the
    /// end-of-run report.
    pub fn mapped_count(&self) -> usize {
        self.mappings.lock().unwrap().len()
    }
}

impl FrameMapper for SimFrameMapper {
    fn alloc_frames(&self, count: usize) -> Vec<u64> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let frame = self.next_frame.fetch_add(1, Ordering::Relaxed);
            if frame >= self.total_frames {
                break;
            }
            out.push(frame);
        }
        out
    }

    fn free_frames(&self, _frames: &[u64]) {
        // The simulator never returns frames to a host; the pool is fixed
        // for the lifetime of one run.
    }

    fn map(&self, va: u64, frame: Option<u64>) {
        let mut mappings = self.mappings.lock().unwrap();
        match frame {
            Some(frame) => {
                mappings.insert(va, frame);
            }
            None => {
                mappings.remove(&va);
            }
        }
    }

    fn map_scatter(&self, entries: &[ScatterEntry]) {
        let mut mappings = self.mappings.lock().unwrap();
        for entry in entries {
            match entry.frame {
                Some(frame) => {
                    mappings.insert(entry.va, frame);
                }
                None => {
                    mappings.remove(&entry.va);
                }
            }
        }
    }
}
