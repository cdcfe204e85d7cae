//! Runtime configuration. Ported from `examples/original_source/include/config.h`:
//! values that were `#define`d constants there become explicit fields here so
//! they can be derived from the CLI input (§6) instead of baked in at compile
//! time.

pub const PAGE_SIZE: u64 = 4096;
pub const BYTES_PER_VA: u64 = 8;

/// Disk slot 0 is permanently reserved so that 0 can mean "no slot".
pub const MIN_DISK_INDEX: u64 = 1;

pub const DEFAULT_NUM_USER_THREADS: u32 = 8;
pub const DEFAULT_ITERATIONS: u64 = 1024 * 1024; // 1Mi
pub const DEFAULT_PHYSICAL_PAGES: u64 = 256 * 1024; // 256Ki
pub const DEFAULT_PAGE_FILE_PAGES: u64 = 128 * 1024; // 128Ki

pub const DEFAULT_FREE_LIST_COUNT: usize = 16;
pub const FREE_PAGE_CACHE_SIZE: usize = 64;
pub const NUM_KERNEL_READ_ADDRESSES: usize = 16;

pub const MAX_WRITE_BATCH_SIZE: usize = 512;
pub const MIN_WRITE_BATCH_SIZE: usize = 1;
pub const MAX_TRIM_BATCH_SIZE: usize = 512;
pub const MAX_TRIM_ATTEMPTS: usize = 4096;
pub const MAX_FREE_BATCH_SIZE: usize = 1;

pub const MAX_SOFT_ACCESS_ATTEMPTS: u32 = 8;
pub const MAX_WAIT_TIME_BEFORE_RETRY: u32 = 64;

pub const EWMA_SMOOTHING_FACTOR: f64 = 0.5;
pub const NUMBER_OF_SAMPLES: usize = 512;

/// Interval between periodic statistics reports (§6) when the logging flag
/// requests them. Ported from the original's `PRINT_FREQUENCY_IN_MILLISECONDS`.
pub const PERIODIC_REPORT_INTERVAL_MILLIS: u64 = 1000;

/// Runtime configuration produced from the four positional CLI integers of
/// §6 plus the derived thresholds of §4 that scale with physical page count.
#[derive(Debug, Clone)]
pub struct VmConfig {
    pub num_user_threads: u32,
    pub iterations: u64,
    pub num_physical_pages: u64,
    pub num_page_file_pages: u64,
    pub num_free_lists: usize,
}

impl VmConfig {
    pub fn new(
        num_user_threads: u32,
        iterations: u64,
        num_physical_pages: u64,
        num_page_file_pages: u64,
    ) -> Self {
        Self {
            num_user_threads,
            iterations,
            num_physical_pages,
            num_page_file_pages,
            num_free_lists: DEFAULT_FREE_LIST_COUNT,
        }
    }

    /// Size of the reserved VA span in pages, per `config.h`'s `VA_SPAN`:
    /// physical pages plus page-file pages, minus 2 (one page always needed
    /// to support movement between memory and disk, one slot lost to the
    /// reserved zero index).
    pub fn va_span_pages(&self) -> u64 {
        self.num_physical_pages + self.num_page_file_pages - 2
    }

    pub fn va_span_bytes(&self) -> u64 {
        self.va_span_pages() * PAGE_SIZE
    }

    /// §4 "begin trimming" threshold: standby + free falling below
    /// physical_pages / 8.
    pub fn start_trimming_threshold(&self) -> u64 {
        self.num_physical_pages / 8
    }

    /// §4 "stop trimming" threshold: active pages above physical_pages * 3/4.
    pub fn active_page_threshold(&self) -> u64 {
        self.num_physical_pages * 3 / 4
    }

    /// §4 "begin writing" threshold: modified list large enough.
    pub fn begin_writing_threshold(&self) -> u64 {
        self.num_physical_pages / 32
    }

    pub fn max_write_batch_size(&self) -> usize {
        MAX_WRITE_BATCH_SIZE.min(self.num_physical_pages as usize).max(1)
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self::new(
            DEFAULT_NUM_USER_THREADS,
            DEFAULT_ITERATIONS,
            DEFAULT_PHYSICAL_PAGES,
            DEFAULT_PAGE_FILE_PAGES,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn va_span_matches_defaults() {
        let cfg = VmConfig::default();
        assert_eq!(
            cfg.va_span_pages(),
            DEFAULT_PHYSICAL_PAGES + DEFAULT_PAGE_FILE_PAGES - 2
        );
    }

    #[test]
    fn thresholds_scale_with_physical_pages() {
        let cfg = VmConfig::new(1, 100, 64, 1024);
        assert_eq!(cfg.start_trimming_threshold(), 8);
        assert_eq!(cfg.active_page_threshold(), 48);
        assert_eq!(cfg.begin_writing_threshold(), 2);
    }
}
