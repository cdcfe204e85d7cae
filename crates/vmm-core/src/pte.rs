//! PTE table (§3, §4.3). A dense array of 64-bit words, one per virtual
//! page, each carrying its own spin lock. The word is mutated with a single
//! aligned atomic store (`WriteULong64NoFence` in the original) so readers
//! never observe a partial mix of the three forms.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{VmError, VmResult};
use crate::spinlock::SpinLock;

const VALID_BIT: u64 = 1 << 0;
const STATUS_BIT: u64 = 1 << 1;
const RW_BIT: u64 = 1 << 2;
const DIRTY_BIT: u64 = 1 << 3;
const ACCESSED_BIT: u64 = 1 << 4;

const FRAME_SHIFT: u32 = 5;
pub const FRAME_NUMBER_BITS: u32 = 40;
pub const MAX_FRAME_NUMBER: u64 = (1u64 << FRAME_NUMBER_BITS) - 1;
const FRAME_MASK: u64 = MAX_FRAME_NUMBER << FRAME_SHIFT;

const NO_FRAME_ASSIGNED: u64 = 0;

const STATUS_TRANSITION: u64 = 0;
const STATUS_ON_DISK: u64 = 1;

/// The three (plus zeroed) mutually exclusive interpretations of a PTE word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PteForm {
    /// Never touched: valid=0, status=0, frame_number=0.
    Zeroed,
    /// Mapped and resident: valid=1.
    Valid {
        frame: u64,
        writable: bool,
        dirty: bool,
        accessed: bool,
    },
    /// Resident but unmapped from hardware; frame still owns the data.
    Transition { frame: u64 },
    /// Swapped out; payload is a disk slot (always >= 1).
    OnDisk { slot: u64 },
}

fn decode(raw: u64) -> PteForm {
    let valid = raw & VALID_BIT != 0;
    let status = (raw & STATUS_BIT) >> 1;
    let payload = (raw & FRAME_MASK) >> FRAME_SHIFT;

    if valid {
        return PteForm::Valid {
            frame: payload,
            writable: raw & RW_BIT != 0,
            dirty: raw & DIRTY_BIT != 0,
            accessed: raw & ACCESSED_BIT != 0,
        };
    }
    if status == STATUS_ON_DISK {
        return PteForm::OnDisk { slot: payload };
    }
    // status == transition
    if payload == NO_FRAME_ASSIGNED {
        PteForm::Zeroed
    } else {
        PteForm::Transition { frame: payload }
    }
}

/// One PTE: a 64-bit word plus its spin lock.
pub struct Pte {
    word: AtomicU64,
    pub lock: SpinLock,
}

impl Pte {
    pub const fn zeroed() -> Self {
        Self {
            word: AtomicU64::new(0),
            lock: SpinLock::new(),
        }
    }

    pub fn form(&self) -> PteForm {
        decode(self.word.load(Ordering::Relaxed))
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.form(), PteForm::Valid { .. })
    }

    pub fn is_transition(&self) -> bool {
        matches!(self.form(), PteForm::Transition { .. })
    }

    pub fn is_on_disk(&self) -> bool {
        matches!(self.form(), PteForm::OnDisk { .. })
    }

    pub fn is_zeroed(&self) -> bool {
        matches!(self.form(), PteForm::Zeroed)
    }

    /// Moves an invalid PTE (transition, zeroed or on-disk) into the valid
    /// form, installing `frame`. Single atomic store, invariant 1 preserved.
    pub fn set_valid(&self, frame: u64) {
        debug_assert!(
            !self.is_valid(),
            "set_valid called on an already-valid PTE"
        );
        debug_assert!(frame <= MAX_FRAME_NUMBER, "frame number out of range");
        let new = VALID_BIT | (frame << FRAME_SHIFT);
        self.word.store(new, Ordering::Relaxed);
    }

    /// Moves a valid PTE into transition form, preserving the frame number.
    pub fn set_transition(&self) {
        let frame = match self.form() {
            PteForm::Valid { frame, .. } => frame,
            other => panic!("set_transition called on non-valid PTE: {other:?}"),
        };
        let new = (frame << FRAME_SHIFT) | (STATUS_TRANSITION << 1);
        self.word.store(new, Ordering::Relaxed);
    }

    /// Moves a transition PTE into on-disk form, installing `slot`.
    pub fn set_on_disk(&self, slot: u64) {
        debug_assert!(slot >= crate::config::MIN_DISK_INDEX, "disk slot 0 is reserved");
        debug_assert!(slot <= MAX_FRAME_NUMBER, "disk slot out of range");
        match self.form() {
            PteForm::Transition { .. } => {}
            other => panic!("set_on_disk called on non-transition PTE: {other:?}"),
        }
        let new = STATUS_BIT | (slot << FRAME_SHIFT);
        self.word.store(new, Ordering::Relaxed);
    }
}

impl Default for Pte {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Dense array of PTEs covering the reserved VA span.
pub struct PteTable {
    base_va: u64,
    entries: Vec<Pte>,
}

impl PteTable {
    pub fn new(base_va: u64, num_pages: u64) -> Self {
        let mut entries = Vec::with_capacity(num_pages as usize);
        entries.resize_with(num_pages as usize, Pte::zeroed);
        Self { base_va, entries }
    }

    pub fn base_va(&self) -> u64 {
        self.base_va
    }

    pub fn end_va(&self) -> u64 {
        self.base_va + self.entries.len() as u64 * crate::config::PAGE_SIZE
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn index_of(&self, index: usize) -> &Pte {
        &self.entries[index]
    }

    /// §4.8 range check: out-of-range is `InvalidAddress`, never an
    /// invariant violation, since it can be driven by user input.
    pub fn pte_for_va(&self, va: u64) -> VmResult<(&Pte, usize)> {
        if va < self.base_va || va >= self.end_va() {
            return Err(VmError::InvalidAddress {
                va,
                base: self.base_va,
                end: self.end_va(),
            });
        }
        let offset = va - self.base_va;
        let index = (offset / crate::config::PAGE_SIZE) as usize;
        Ok((&self.entries[index], index))
    }

    pub fn va_of(&self, index: usize) -> u64 {
        self.base_va + index as u64 * crate::config::PAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn valid_transition_round_trip_preserves_frame(frame in 0u64..=MAX_FRAME_NUMBER) {
            let pte = Pte::zeroed();
            pte.set_valid(frame);
            prop_assert_eq!(
                pte.form(),
                PteForm::Valid { frame, writable: false, dirty: false, accessed: false }
            );
            pte.set_transition();
            prop_assert_eq!(pte.form(), PteForm::Transition { frame });
        }

        #[test]
        fn on_disk_round_trip_preserves_slot(
            frame in 0u64..=MAX_FRAME_NUMBER,
            slot in crate::config::MIN_DISK_INDEX..=MAX_FRAME_NUMBER,
        ) {
            let pte = Pte::zeroed();
            pte.set_valid(frame);
            pte.set_transition();
            pte.set_on_disk(slot);
            prop_assert_eq!(pte.form(), PteForm::OnDisk { slot });
        }

        /// §3's "readers never observe a partial mix of forms": every raw
        /// 64-bit pattern decodes to exactly one of the four forms, never
        /// panics, and never reports two forms' fields at once.
        #[test]
        fn decode_any_bit_pattern_yields_exactly_one_form(raw in any::<u64>()) {
            match decode(raw) {
                PteForm::Zeroed | PteForm::Valid { .. } | PteForm::Transition { .. } | PteForm::OnDisk { .. } => {}
            }
        }
    }

    #[test]
    fn zeroed_is_exactly_one_form() {
        let pte = Pte::zeroed();
        assert!(pte.is_zeroed());
        assert!(!pte.is_valid());
        assert!(!pte.is_transition());
        assert!(!pte.is_on_disk());
    }

    #[test]
    fn valid_then_transition_then_on_disk_round_trip() {
        let pte = Pte::zeroed();
        pte.set_valid(42);
        assert_eq!(pte.form(), PteForm::Valid { frame: 42, writable: false, dirty: false, accessed: false });

        pte.set_transition();
        assert_eq!(pte.form(), PteForm::Transition { frame: 42 });

        pte.set_on_disk(7);
        assert_eq!(pte.form(), PteForm::OnDisk { slot: 7 });
    }

    #[test]
    #[should_panic]
    fn set_on_disk_from_valid_panics() {
        let pte = Pte::zeroed();
        pte.set_valid(1);
        pte.set_on_disk(1);
    }

    #[test]
    fn table_bounds_check() {
        let table = PteTable::new(0x1000, 4);
        assert!(table.pte_for_va(0x1000).is_ok());
        assert!(table.pte_for_va(0x1000 + 3 * 4096).is_ok());
        assert!(table.pte_for_va(0x1000 + 4 * 4096).is_err());
        assert!(table.pte_for_va(0x0FFF).is_err());
    }
}
