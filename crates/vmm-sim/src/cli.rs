//! Command-line arguments (§6): four positional integers matching the
//! original's `argv`, defaulting to the same values baked into
//! `vmm_core::config` when omitted.

use clap::Parser;

use vmm_core::config::{
    DEFAULT_ITERATIONS, DEFAULT_NUM_USER_THREADS, DEFAULT_PAGE_FILE_PAGES, DEFAULT_PHYSICAL_PAGES,
};

#[derive(Parser, Debug)]
#[command(name = "vmm-sim", about = "Usermode virtual-memory manager simulator")]
pub struct Args {
    /// Number of concurrent user threads driving faults.
    #[arg(default_value_t = DEFAULT_NUM_USER_THREADS)]
    pub num_user_threads: u32,

    /// Total virtual-address accesses issued across all user threads.
    #[arg(default_value_t = DEFAULT_ITERATIONS)]
    pub iterations: u64,

    /// Physical frames granted to the process.
    #[arg(default_value_t = DEFAULT_PHYSICAL_PAGES)]
    pub num_physical_pages: u64,

    /// Page-file slots backing the disk-slot bitmap.
    #[arg(default_value_t = DEFAULT_PAGE_FILE_PAGES)]
    pub num_page_file_pages: u64,

    /// Print a FREE/ACTIVE/MODIFIED/STANDBY percentage report once per
    /// `PERIODIC_REPORT_INTERVAL_MILLIS` while the simulation runs, mirroring
    /// the original's `LOGGING_MODE` compile flag.
    #[arg(long)]
    pub periodic_report: bool,
}
