//! The frame-mapper contract (§6): the host facility that grants physical
//! frames and maps/unmaps them to virtual addresses. Out of scope per §1 —
//! `vmm-core` only depends on this trait; a concrete implementation lives
//! in `vmm-sim`.

/// A single VA -> frame mapping request for a scatter call.
#[derive(Debug, Clone, Copy)]
pub struct ScatterEntry {
    pub va: u64,
    /// `None` unmaps this VA.
    pub frame: Option<u64>,
}

pub trait FrameMapper: Send + Sync {
    /// Obtains up to `count` host-assigned frame numbers; returns those
    /// actually obtained (may be fewer than `count`).
    fn alloc_frames(&self, count: usize) -> Vec<u64>;

    /// Returns frames to the host.
    fn free_frames(&self, frames: &[u64]);

    /// Installs (or, with `frame = None`, removes) a single VA mapping.
    fn map(&self, va: u64, frame: Option<u64>);

    /// Installs/removes a batch of VA mappings in one call, matching the
    /// original's single scatter-form `map_pages`/`unmap_pages`.
    fn map_scatter(&self, entries: &[ScatterEntry]);
}
