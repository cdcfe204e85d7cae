//! Entry point: wires a [`vmm_core::VmSystem`] up to a concrete frame mapper
//! and a set of user/background threads, runs the configured workload, and
//! reports elapsed time the way the original's driver does.

mod cli;
mod event;
mod frame_mapper;
mod stats_printer;
mod workload;

use std::thread;
use std::time::Instant;

use clap::Parser;

use vmm_core::config::VmConfig;
use vmm_core::event::EventSet;
use vmm_core::fault_handler::ThreadFaultContext;
use vmm_core::frame_mapper::FrameMapper;
use vmm_core::pruner::Pruner;
use vmm_core::scheduler::Scheduler;
use vmm_core::trimmer::Trimmer;
use vmm_core::writer::Writer;
use vmm_core::VmSystem;

use event::Events;
use frame_mapper::SimFrameMapper;
use stats_printer::StatsPrinter;
use workload::Workload;

fn main() {
    tracing_subscriber::fmt::init();

    let args = cli::Args::parse();
    let config = VmConfig::new(
        args.num_user_threads,
        args.iterations,
        args.num_physical_pages,
        args.num_page_file_pages,
    );

    let mapper = SimFrameMapper::new(config.num_physical_pages);
    let frames = mapper.alloc_frames(config.num_physical_pages as usize);
    if frames.len() as u64 != config.num_physical_pages {
        tracing::error!(
            requested = config.num_physical_pages,
            obtained = frames.len(),
            "host did not grant the requested physical frames"
        );
        std::process::exit(1);
    }

    let periodic_report = args.periodic_report;
    let events: Box<dyn EventSet> = Box::new(Events::new());
    let vm = VmSystem::new(config, &frames, events);
    tracing::info!(
        num_user_threads = vm.config.num_user_threads,
        iterations = vm.config.iterations,
        num_physical_pages = vm.config.num_physical_pages,
        num_page_file_pages = vm.config.num_page_file_pages,
        "starting simulation"
    );

    let started = Instant::now();

    thread::scope(|scope| {
        scope.spawn(|| Trimmer::new().run(&vm, &mapper));
        scope.spawn(|| Writer::new().run(&vm));
        scope.spawn(|| Pruner::new().run(&vm));
        scope.spawn(|| Scheduler::new().run(&vm));
        scope.spawn(|| StatsPrinter::run(&vm, periodic_report));

        vm.events.system_start().set();

        let per_thread = vm.config.iterations / vm.config.num_user_threads.max(1) as u64;
        let mut user_handles = Vec::new();
        for thread_id in 0..vm.config.num_user_threads {
            let handle = scope.spawn({
                let vm = &vm;
                let mapper = &mapper;
                move || {
                    let mut ctx = ThreadFaultContext::new(thread_id, vm.config.num_free_lists, vm.end_va());
                    let mut workload = Workload::new(thread_id as u64);
                    workload.run(vm, mapper, &mut ctx, per_thread)
                }
            });
            user_handles.push(handle);
        }

        for handle in user_handles {
            let resolved = handle.join().expect("user thread panicked");
            tracing::debug!(resolved, "user thread finished");
        }

        vm.events.system_exit().set();
    });

    let elapsed = started.elapsed();
    println!("{}", StatsPrinter::summary_line(&vm));
    println!(
        "Test successful. Time elapsed: {:.3} seconds.",
        elapsed.as_secs_f64()
    );
    tracing::info!(
        hard_faults = vm.stats.n_hard.load(std::sync::atomic::Ordering::Relaxed),
        soft_faults = vm.stats.n_soft.load(std::sync::atomic::Ordering::Relaxed),
        mapped = mapper.mapped_count(),
        "simulation complete"
    );
}
