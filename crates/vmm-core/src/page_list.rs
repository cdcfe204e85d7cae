//! Doubly linked page lists (§3, §4.5): one sentinel head, a shared/
//! exclusive list lock, and per-node locks (the per-PFN [`SpinLock`]). The
//! head is addressed through the same index space as real PFNs so the same
//! link-rewriting code works at the list boundary, per §4.5's "the head is
//! treated as a regular lockable node".

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::thread;

use crate::config::MAX_SOFT_ACCESS_ATTEMPTS;
use crate::pfn::{Pfn, PfnTable, NIL};
use crate::spinlock::SpinLock;

/// Sentinel identity for the list head, distinct from any real PFN-table
/// index (which are always `< PfnTable::len()`).
pub const HEAD: usize = NIL;

/// A doubly linked list of PFNs, headed by a sentinel of the same shape as
/// a `Pfn`'s link fields.
pub struct PageList {
    head_flink: AtomicUsize,
    head_blink: AtomicUsize,
    head_lock: SpinLock,
    size: AtomicU64,
    /// Shared for concurrent mutators; exclusive for the validator and the
    /// remove-from-middle escalation path.
    rw: RwLock<()>,
}

impl PageList {
    pub fn new() -> Self {
        Self {
            head_flink: AtomicUsize::new(HEAD),
            head_blink: AtomicUsize::new(HEAD),
            head_lock: SpinLock::new(),
            size: AtomicU64::new(0),
            rw: RwLock::new(()),
        }
    }

    pub fn len(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_of<'a>(&'a self, table: &'a PfnTable, node: usize) -> &'a SpinLock {
        if node == HEAD {
            &self.head_lock
        } else {
            &table.by_index(node).lock
        }
    }

    fn flink_of<'a>(&'a self, table: &'a PfnTable, node: usize) -> &'a AtomicUsize {
        if node == HEAD {
            &self.head_flink
        } else {
            &table.by_index(node).flink
        }
    }

    fn blink_of<'a>(&'a self, table: &'a PfnTable, node: usize) -> &'a AtomicUsize {
        if node == HEAD {
            &self.head_blink
        } else {
            &table.by_index(node).blink
        }
    }

    fn try_lock_with_backoff(lock: &SpinLock) -> bool {
        let mut backoff = 1u32;
        for _ in 0..MAX_SOFT_ACCESS_ATTEMPTS {
            if lock.try_acquire() {
                return true;
            }
            thread::yield_now();
            let _ = backoff; // capped doubling mirrors crate::spinlock's own back-off
            backoff = (backoff << 1).min(crate::config::MAX_WAIT_TIME_BEFORE_RETRY);
        }
        false
    }

    /// Appends `node` (a real PFN-table index) to the tail of the list.
    pub fn insert_tail(&self, table: &PfnTable, node: usize) {
        debug_assert_ne!(node, HEAD);
        let _shared = self.rw.read().unwrap();
        self.head_lock.acquire();
        let old_tail = self.head_blink.load(Ordering::Relaxed);
        let old_tail_lock = self.lock_of(table, old_tail);
        if old_tail != HEAD {
            old_tail_lock.acquire();
        }

        self.flink_of(table, old_tail).store(node, Ordering::Relaxed);
        self.blink_of(table, node).store(old_tail, Ordering::Relaxed);
        self.flink_of(table, node).store(HEAD, Ordering::Relaxed);
        self.head_blink.store(node, Ordering::Relaxed);

        if old_tail != HEAD {
            old_tail_lock.release();
        }
        self.head_lock.release();
        self.size.fetch_add(1, Ordering::Relaxed);
    }

    /// Try-form removal from the head, for concurrent removers (unused by
    /// the writer, which prefers `remove_batch_from_head`).
    pub fn pop_head(&self, table: &PfnTable) -> Option<usize> {
        let _shared = self.rw.read().unwrap();
        self.head_lock.acquire();
        let first = self.head_flink.load(Ordering::Relaxed);
        if first == HEAD {
            self.head_lock.release();
            return None;
        }
        if !Self::try_lock_with_backoff(self.lock_of(table, first)) {
            self.head_lock.release();
            return None;
        }
        let second = self.flink_of(table, first).load(Ordering::Relaxed);
        self.blink_of(table, second).store(HEAD, Ordering::Relaxed);
        self.head_flink.store(second, Ordering::Relaxed);
        self.lock_of(table, first).release();
        self.head_lock.release();
        self.size.fetch_sub(1, Ordering::Relaxed);
        Some(first)
    }

    /// Unlinks `node` from wherever it sits in the list. Caller must already
    /// hold `node`'s PFN lock (§4.8's soft-fault path does), which prevents
    /// it from moving elsewhere mid-unlink.
    pub fn remove_in_middle(&self, table: &PfnTable, node: usize) {
        debug_assert_ne!(node, HEAD);
        let _shared = self.rw.read().unwrap();
        let prev = self.blink_of(table, node).load(Ordering::Relaxed);
        let next = self.flink_of(table, node).load(Ordering::Relaxed);

        let prev_lock = self.lock_of(table, prev);
        let next_lock = self.lock_of(table, next);

        if prev == next {
            prev_lock.acquire();
        } else {
            prev_lock.acquire();
            next_lock.acquire();
        }

        self.flink_of(table, prev).store(next, Ordering::Relaxed);
        self.blink_of(table, next).store(prev, Ordering::Relaxed);

        if prev != next {
            next_lock.release();
        }
        prev_lock.release();
        self.size.fetch_sub(1, Ordering::Relaxed);
    }

    /// Walks from the head, locking consecutive PFNs until `capacity −
    /// reserved` are locked, the list is exhausted, or a try-lock fails;
    /// detaches the run in one pointer swap and returns the detached indices
    /// (still locked — caller is responsible for unlocking each one).
    /// `reserved` holds back part of the requested capacity for a caller
    /// that needs headroom elsewhere (e.g. slots already spoken for).
    pub fn remove_batch_from_head(&self, table: &PfnTable, capacity: usize, reserved: usize) -> Vec<usize> {
        let effective_capacity = capacity.saturating_sub(reserved);
        let _shared = self.rw.read().unwrap();
        self.head_lock.acquire();
        let mut batch = Vec::with_capacity(effective_capacity);
        let mut cursor = self.head_flink.load(Ordering::Relaxed);

        while batch.len() < effective_capacity && cursor != HEAD {
            if !self.lock_of(table, cursor).try_acquire() {
                break;
            }
            let next = self.flink_of(table, cursor).load(Ordering::Relaxed);
            batch.push(cursor);
            cursor = next;
        }

        if !batch.is_empty() {
            // `cursor` is the first node not taken (or HEAD if the whole
            // list was drained); relink the head directly to it.
            self.blink_of(table, cursor).store(HEAD, Ordering::Relaxed);
            self.head_flink.store(cursor, Ordering::Relaxed);
            self.size.fetch_sub(batch.len() as u64, Ordering::Relaxed);
        }
        self.head_lock.release();
        batch
    }

    /// Appends all of `src`'s contents onto `self`'s tail in one link swap.
    /// Holds both lists' head locks; `src` is empty afterwards.
    pub fn splice_tail(&self, table: &PfnTable, src: &PageList) {
        let _self_shared = self.rw.read().unwrap();
        let _src_shared = src.rw.read().unwrap();

        self.head_lock.acquire();
        if &self.head_lock as *const _ != &src.head_lock as *const _ {
            src.head_lock.acquire();
        }

        let src_first = src.head_flink.load(Ordering::Relaxed);
        if src_first == HEAD {
            if &self.head_lock as *const _ != &src.head_lock as *const _ {
                src.head_lock.release();
            }
            self.head_lock.release();
            return;
        }
        let src_last = src.head_blink.load(Ordering::Relaxed);
        let self_last = self.head_blink.load(Ordering::Relaxed);

        self.flink_of(table, self_last).store(src_first, Ordering::Relaxed);
        self.blink_of(table, src_first).store(self_last, Ordering::Relaxed);
        self.flink_of(table, src_last).store(HEAD, Ordering::Relaxed);
        self.head_blink.store(src_last, Ordering::Relaxed);

        src.head_flink.store(HEAD, Ordering::Relaxed);
        src.head_blink.store(HEAD, Ordering::Relaxed);
        let moved = src.size.swap(0, Ordering::Relaxed);
        self.size.fetch_add(moved, Ordering::Relaxed);

        if &self.head_lock as *const _ != &src.head_lock as *const _ {
            src.head_lock.release();
        }
        self.head_lock.release();
    }

    /// Exclusive-mode validator helper: walks the whole list head-to-tail.
    /// Used by tests and invariant checks, never on the hot path.
    pub fn to_vec(&self, table: &PfnTable) -> Vec<usize> {
        let _exclusive = self.rw.write().unwrap();
        let mut out = Vec::new();
        let mut cursor = self.head_flink.load(Ordering::Relaxed);
        while cursor != HEAD {
            out.push(cursor);
            cursor = self.flink_of(table, cursor).load(Ordering::Relaxed);
        }
        out
    }
}

impl Default for PageList {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper for callers that just need `&Pfn` from an index returned by list
/// operations above.
pub fn pfn_at<'a>(table: &'a PfnTable, index: usize) -> &'a Pfn {
    table.by_index(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pfn::PfnTable;

    #[test]
    fn insert_and_drain() {
        let table = PfnTable::new(0, 5);
        let list = PageList::new();
        for i in 0..5 {
            list.insert_tail(&table, i);
        }
        assert_eq!(list.len(), 5);
        assert_eq!(list.to_vec(&table), vec![0, 1, 2, 3, 4]);

        let mut popped = Vec::new();
        while let Some(n) = list.pop_head(&table) {
            table.by_index(n).lock.release();
            popped.push(n);
        }
        assert_eq!(popped, vec![0, 1, 2, 3, 4]);
        assert!(list.is_empty());
    }

    #[test]
    fn remove_in_middle_relinks() {
        let table = PfnTable::new(0, 3);
        let list = PageList::new();
        for i in 0..3 {
            list.insert_tail(&table, i);
        }
        table.by_index(1).lock.acquire();
        list.remove_in_middle(&table, 1);
        table.by_index(1).lock.release();
        assert_eq!(list.to_vec(&table), vec![0, 2]);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn remove_batch_from_head_detaches_run_and_unlocked_nodes_stay_locked() {
        let table = PfnTable::new(0, 4);
        let list = PageList::new();
        for i in 0..4 {
            list.insert_tail(&table, i);
        }
        let batch = list.remove_batch_from_head(&table, 2, 0);
        assert_eq!(batch, vec![0, 1]);
        assert_eq!(list.len(), 2);
        for n in &batch {
            assert!(table.by_index(*n).lock.is_locked());
            table.by_index(*n).lock.release();
        }
        assert_eq!(list.to_vec(&table), vec![2, 3]);
    }

    #[test]
    fn remove_batch_from_head_on_empty_list_returns_empty() {
        let table = PfnTable::new(0, 1);
        let list = PageList::new();
        assert!(list.remove_batch_from_head(&table, 5, 0).is_empty());
    }

    #[test]
    fn remove_batch_from_head_respects_reserved() {
        let table = PfnTable::new(0, 4);
        let list = PageList::new();
        for i in 0..4 {
            list.insert_tail(&table, i);
        }
        let batch = list.remove_batch_from_head(&table, 3, 2);
        assert_eq!(batch, vec![0]);
        assert_eq!(list.len(), 3);
        table.by_index(0).lock.release();
    }

    #[test]
    fn splice_tail_appends_whole_list() {
        let table = PfnTable::new(0, 4);
        let a = PageList::new();
        let b = PageList::new();
        a.insert_tail(&table, 0);
        a.insert_tail(&table, 1);
        b.insert_tail(&table, 2);
        b.insert_tail(&table, 3);

        a.splice_tail(&table, &b);
        assert_eq!(a.to_vec(&table), vec![0, 1, 2, 3]);
        assert!(b.is_empty());
        assert_eq!(a.len(), 4);
    }
}
