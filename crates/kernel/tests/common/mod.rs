use kernel::{Config, SchedulerPolicy};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_DIR: AtomicU32 = AtomicU32::new(0);

/// Fresh per-test output directory under the system temp dir.
pub fn out_dir(tag: &str) -> PathBuf {
    let n = NEXT_DIR.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!(
        "osemu-{tag}-{}-{n}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Baseline configuration for tests; scenarios override the fields they
/// care about.
pub fn base_config() -> Config {
    Config {
        num_cpu: 1,
        scheduler: SchedulerPolicy::Fcfs,
        quantum_cycles: 4,
        batch_process_freq: 1,
        min_ins: 1,
        max_ins: 10,
        delay_per_exec: 0,
        max_overall_mem: 1024,
        mem_per_frame: 64,
        min_mem_per_proc: 64,
        max_mem_per_proc: 1024,
    }
}
