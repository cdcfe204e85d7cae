//! Error taxonomy, §7. Transient races and invariant violations are
//! deliberately *not* variants here: a transient race is recovered locally
//! by restarting the caller's loop (never surfaced), and an invariant
//! violation is a `panic!`/`assert!` at the call site (fatal, meant to be
//! diagnosed, not handled).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VmError {
    #[error("host refused the bulk-frame privilege: {0}")]
    Privilege(String),

    #[error("host refused virtual or physical memory allocation: {0}")]
    Allocation(String),

    #[error("faulting virtual address {va:#x} is outside the reserved span [{base:#x}, {end:#x})")]
    InvalidAddress { va: u64, base: u64, end: u64 },

    #[error("disk-slot allocator could not meet the requested batch of {requested}; obtained {obtained}")]
    SlotExhaustion { requested: usize, obtained: usize },
}

pub type VmResult<T> = Result<T, VmError>;
