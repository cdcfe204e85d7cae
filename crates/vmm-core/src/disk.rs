//! Disk-slot bitmap allocator (§4.2). Lock-free via atomic OR/AND/CAS on
//! 64-bit words. Only the writer *sets* bits (single producer, enforced
//! here by `WriterStash` owning a private, non-atomic `Vec`); any thread
//! may *clear* a bit once it holds the PTE/PFN locks that make the slot
//! safe to release (§4.8 step 4, §4.7 correctness invariant).

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::config::{MIN_DISK_INDEX, PAGE_SIZE};

const BITS_PER_ROW: u64 = 64;

/// The page-file bitmap. Slot 0 is permanently marked in-use.
pub struct DiskBitmap {
    rows: Vec<AtomicU64>,
    num_slots: u64,
    empty_slots: AtomicI64,
    /// Swap buffer: an in-memory model of the page file, `num_slots * PAGE_SIZE` bytes.
    page_file: Vec<u8>,
}

impl DiskBitmap {
    pub fn new(num_slots: u64) -> Self {
        assert!(num_slots >= BITS_PER_ROW, "page file too small");
        let rows = (num_slots + BITS_PER_ROW - 1) / BITS_PER_ROW;
        let mut bitmap = Self {
            rows: (0..rows).map(|_| AtomicU64::new(0)).collect(),
            num_slots,
            empty_slots: AtomicI64::new(num_slots as i64),
            page_file: vec![0u8; num_slots as usize * PAGE_SIZE as usize],
        };
        // Slot 0 is reserved so it can denote "no slot"; burn one page of
        // disk space to keep it permanently set.
        bitmap.set(0);
        bitmap
    }

    pub fn num_slots(&self) -> u64 {
        self.num_slots
    }

    fn validate(&self, slot: u64) {
        assert!(
            slot < self.num_slots,
            "disk slot {slot} exceeds page file size {}",
            self.num_slots
        );
    }

    fn row_and_mask(slot: u64) -> (usize, u64) {
        ((slot / BITS_PER_ROW) as usize, 1u64 << (slot % BITS_PER_ROW))
    }

    /// Atomic OR; asserts the bit was previously clear. Only the writer calls this.
    pub fn set(&self, slot: u64) {
        self.validate(slot);
        let (row, mask) = Self::row_and_mask(slot);
        let prior = self.rows[row].fetch_or(mask, Ordering::Relaxed);
        assert_eq!(prior & mask, 0, "set() on an already-set disk slot {slot}");
        if slot != 0 {
            self.empty_slots.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Atomic AND with the inverse mask; asserts the bit was previously set.
    ///
    /// # Panics
    /// Panics if `slot == 0` (disk slot 0 can never be allocated) or the
    /// slot was already clear (invariant violation, §7).
    pub fn clear(&self, slot: u64) {
        assert!(slot >= MIN_DISK_INDEX, "disk slot 0 cannot be cleared");
        self.validate(slot);
        let (row, mask) = Self::row_and_mask(slot);
        let prior = self.rows[row].fetch_and(!mask, Ordering::Relaxed);
        assert_eq!(prior & mask, mask, "clear() on an already-clear disk slot {slot}");
        self.empty_slots.fetch_add(1, Ordering::Relaxed);
    }

    pub fn empty_slots(&self) -> i64 {
        self.empty_slots.load(Ordering::Relaxed)
    }

    /// Pointer (byte range) into the in-memory swap buffer for `slot`.
    pub fn page_file_bytes(&self, slot: u64) -> &[u8] {
        assert!(slot >= MIN_DISK_INDEX, "disk slot 0 is forbidden");
        self.validate(slot);
        let start = slot as usize * PAGE_SIZE as usize;
        &self.page_file[start..start + PAGE_SIZE as usize]
    }

    /// Mutable access, used by the writer to flush a page and by the fault
    /// handler to restore one. Safe because a slot is only ever touched by
    /// the thread currently holding the PFN lock that references it.
    #[allow(clippy::mut_from_ref)]
    pub fn page_file_bytes_mut(&self, slot: u64) -> &mut [u8] {
        assert!(slot >= MIN_DISK_INDEX, "disk slot 0 is forbidden");
        self.validate(slot);
        let start = slot as usize * PAGE_SIZE as usize;
        // SAFETY: callers only index a slot they exclusively own via the
        // PFN lock protocol; no two threads reference the same slot
        // concurrently (§4.7 correctness invariant).
        unsafe {
            let ptr = self.page_file.as_ptr().add(start) as *mut u8;
            std::slice::from_raw_parts_mut(ptr, PAGE_SIZE as usize)
        }
    }

    fn row_count(&self) -> u64 {
        self.rows.len() as u64
    }
}

/// The writer's private stash of pre-acquired slots. Owning a plain `Vec`
/// (not shared, not atomic) makes the "writer is the sole producer"
/// invariant a property of the type rather than a comment (§9a).
pub struct WriterStash {
    slots: Vec<u64>,
    last_checked_row: u64,
}

impl WriterStash {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            last_checked_row: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Fills the stash with up to `target_count` newly acquired slots.
    /// Scans rows starting at `last_checked_row`, one revolution max.
    pub fn stash_slots(&mut self, bitmap: &DiskBitmap, target_count: usize) {
        let rows = bitmap.row_count();
        for _ in 0..rows {
            self.last_checked_row = (self.last_checked_row + 1) % rows;
            let row = self.last_checked_row;

            let snapshot = bitmap.rows[row as usize].load(Ordering::Relaxed);
            if snapshot == u64::MAX {
                continue;
            }

            if snapshot == 0 {
                if bitmap.rows[row as usize]
                    .compare_exchange(0, u64::MAX, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    bitmap.empty_slots.fetch_sub(BITS_PER_ROW as i64, Ordering::Relaxed);
                    let base = row * BITS_PER_ROW;
                    for bit in 0..BITS_PER_ROW {
                        let slot = base + bit;
                        if slot == 0 || slot >= bitmap.num_slots {
                            continue;
                        }
                        self.slots.push(slot);
                    }
                    if self.slots.len() >= target_count {
                        return;
                    }
                    continue;
                }
            }

            let base = row * BITS_PER_ROW;
            for bit in 0..BITS_PER_ROW {
                let slot = base + bit;
                if slot == 0 || slot >= bitmap.num_slots {
                    continue;
                }
                let mask = 1u64 << bit;
                if bitmap.rows[row as usize].fetch_or(mask, Ordering::Relaxed) & mask == 0 {
                    bitmap.empty_slots.fetch_sub(1, Ordering::Relaxed);
                    self.slots.push(slot);
                }
            }

            if self.slots.len() >= target_count {
                return;
            }
        }
    }

    /// LIFO removal.
    ///
    /// # Panics
    /// Panics if the stash is empty (invariant violation, §7).
    pub fn pop_stashed(&mut self) -> u64 {
        self.slots.pop().expect("pop_stashed called on an empty stash")
    }

    /// Clears and returns any slots left in the stash (under-batch case).
    pub fn drain_clear(&mut self, bitmap: &DiskBitmap) {
        while let Some(slot) = self.slots.pop() {
            bitmap.clear(slot);
        }
    }
}

impl Default for WriterStash {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_zero_is_reserved() {
        let bitmap = DiskBitmap::new(256);
        assert_eq!(bitmap.empty_slots(), 255);
    }

    #[test]
    #[should_panic(expected = "disk slot 0 cannot be cleared")]
    fn clearing_slot_zero_panics() {
        let bitmap = DiskBitmap::new(256);
        bitmap.clear(0);
    }

    #[test]
    fn set_then_clear_round_trip() {
        let bitmap = DiskBitmap::new(256);
        bitmap.set(5);
        assert_eq!(bitmap.empty_slots(), 254);
        bitmap.clear(5);
        assert_eq!(bitmap.empty_slots(), 255);
    }

    #[test]
    #[should_panic]
    fn double_set_panics() {
        let bitmap = DiskBitmap::new(256);
        bitmap.set(5);
        bitmap.set(5);
    }

    #[test]
    fn stash_fills_and_clears() {
        let bitmap = DiskBitmap::new(256);
        let mut stash = WriterStash::new();
        stash.stash_slots(&bitmap, 10);
        assert!(stash.len() >= 10);
        let popped = stash.pop_stashed();
        bitmap.clear(popped);
        stash.drain_clear(&bitmap);
        assert!(stash.is_empty());
        assert_eq!(bitmap.empty_slots(), 255);
    }

    #[test]
    fn popcount_equals_total_minus_empty() {
        let bitmap = DiskBitmap::new(256);
        let mut stash = WriterStash::new();
        stash.stash_slots(&bitmap, 37);
        let set_count = 256 - bitmap.empty_slots();
        assert_eq!(set_count as u64, stash.len() as u64 + 1); // +1 for slot 0
    }
}
