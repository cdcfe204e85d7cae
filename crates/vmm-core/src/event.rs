//! Blocking event primitives (§5) as a trait boundary. §1 lists "the host
//! ... thread/event primitives" as an external collaborator, the same
//! category as frame allocation: this module only defines the contract a
//! named event and the six-event bundle must satisfy. The concrete,
//! `Condvar`-backed implementation lives in `vmm-sim`, matching the split
//! `FrameMapper` draws for frame allocation.

use std::time::Duration;

/// A single named blocking event — `system_start`,
/// `initiate_{trimming,writing,pruning}`, `standby_pages_ready`, or
/// `system_exit` — in whatever reset mode its concrete implementation gives
/// it.
pub trait VmEvent: Send + Sync {
    fn set(&self);
    fn reset(&self);
    fn is_set(&self) -> bool;

    /// Waits with infinite timeout.
    fn wait(&self);

    /// Bounded wait used by the scheduler's periodic sampling; returns
    /// whether the event became signaled before the timeout elapsed.
    fn wait_timeout(&self, timeout: Duration) -> bool;
}

/// The named events of §5, reached through trait objects rather than owned
/// directly, so the concrete blocking primitive stays outside this crate.
pub trait EventSet: Send + Sync {
    fn system_start(&self) -> &dyn VmEvent;
    fn initiate_trimming(&self) -> &dyn VmEvent;
    fn initiate_writing(&self) -> &dyn VmEvent;
    fn initiate_pruning(&self) -> &dyn VmEvent;
    fn standby_pages_ready(&self) -> &dyn VmEvent;
    fn system_exit(&self) -> &dyn VmEvent;
}

/// Index of the event that woke the waiter, mirroring `ACTIVE_EVENT_INDEX`
/// / `EXIT_EVENT_INDEX` pairing used by every background worker's
/// `wait_any(initiate_*, system_exit)`.
pub enum WaitAnyResult {
    Active,
    Exit,
}

/// Waits on either `active` or `exit` becoming signaled, polling both with a
/// short sleep between checks. A true `wait_any` over OS handles isn't
/// expressible portably over two trait objects without a third
/// synchronization primitive; polling at a fine grain is the idiomatic
/// stand-in and keeps the cancellation latency bounded, matching §5's
/// "workers wait via a `wait_any` ... when `system_exit` fires they return
/// immediately".
pub fn wait_any(active: &dyn VmEvent, exit: &dyn VmEvent) -> WaitAnyResult {
    const POLL_INTERVAL: Duration = Duration::from_millis(1);
    loop {
        if exit.is_set() {
            return WaitAnyResult::Exit;
        }
        if active.wait_timeout(POLL_INTERVAL) {
            return WaitAnyResult::Active;
        }
    }
}
