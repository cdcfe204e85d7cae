//! Two-byte spin lock embedded in every PTE and PFN.
//!
//! Mirrors the original `BYTE_LOCK`: a 16-bit semaphore, bounded exponential
//! back-off on contention, no fairness guarantee. Kept at 2 bytes so it fits
//! alongside a PTE/PFN without growing the word.

use std::hint;
use std::sync::atomic::{AtomicU16, Ordering};

const UNLOCKED: u16 = 0;
const LOCKED: u16 = 1;
const MAX_WAIT_TIME_BEFORE_RETRY: u32 = 64;

#[derive(Debug)]
pub struct SpinLock {
    semaphore: AtomicU16,
}

impl SpinLock {
    pub const fn new() -> Self {
        Self {
            semaphore: AtomicU16::new(UNLOCKED),
        }
    }

    /// Blocking acquire with doubling back-off capped at `MAX_WAIT_TIME_BEFORE_RETRY`.
    pub fn acquire(&self) {
        let mut backoff = 1u32;
        loop {
            if self.semaphore.load(Ordering::Relaxed) == LOCKED {
                for _ in 0..backoff {
                    hint::spin_loop();
                }
                backoff = (backoff << 1).min(MAX_WAIT_TIME_BEFORE_RETRY);
                continue;
            }
            if self
                .semaphore
                .compare_exchange_weak(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Single compare-and-swap attempt; never blocks.
    pub fn try_acquire(&self) -> bool {
        if self.semaphore.load(Ordering::Relaxed) == LOCKED {
            return false;
        }
        self.semaphore
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Releases a lock this thread is assumed to hold.
    ///
    /// # Panics
    /// Panics (invariant violation, §7) if the lock was not held.
    pub fn release(&self) {
        let prior = self.semaphore.swap(UNLOCKED, Ordering::Release);
        assert_eq!(prior, LOCKED, "unlocking a lock that was not held");
    }

    pub fn is_locked(&self) -> bool {
        self.semaphore.load(Ordering::Relaxed) == LOCKED
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for [`SpinLock::acquire`]. Most call sites use the bare
/// lock/unlock pair to mirror the original's explicit `lock_pte`/`unlock_pte`
/// calls, but this guard is convenient for straight-line critical sections.
pub struct SpinLockGuard<'a> {
    lock: &'a SpinLock,
}

impl SpinLock {
    pub fn lock_guard(&self) -> SpinLockGuard<'_> {
        self.acquire();
        SpinLockGuard { lock: self }
    }
}

impl Drop for SpinLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn try_acquire_then_release() {
        let lock = SpinLock::new();
        assert!(lock.try_acquire());
        assert!(!lock.try_acquire());
        lock.release();
        assert!(lock.try_acquire());
        lock.release();
    }

    #[test]
    #[should_panic(expected = "unlocking a lock that was not held")]
    fn double_release_panics() {
        let lock = SpinLock::new();
        lock.release();
    }

    #[test]
    fn mutual_exclusion_under_contention() {
        let lock = Arc::new(SpinLock::new());
        let counter = Arc::new(AtomicU16::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            let counter = counter.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    lock.acquire();
                    let v = counter.load(Ordering::Relaxed);
                    counter.store(v + 1, Ordering::Relaxed);
                    lock.release();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 8000);
    }
}
