//! Lifecycle controller and external façade: create processes, start and
//! stop the scheduler, and answer status queries.

use anyhow::{bail, Context, Result};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use memory::MemoryManager;
use vm::{parse_program, ParseError, Pid, Process, ProcessHandle, ProcessStatus};

use crate::config::{valid_proc_mem, Config};
use crate::counters::Counters;
use crate::generator;
use crate::report::{self, ProcessInfo, StatusReport, VmStat, TIMESTAMP_FORMAT};
use crate::scheduler::{spawn_scheduler, Shared};

/// Why `create_process` refused a request. No side effects accompany any of
/// these.
#[derive(Debug)]
pub enum CreateError {
    /// Size is not a power of two in [64, 65536].
    InvalidMemorySize(usize),
    /// Another process already uses the name.
    NameConflict(String),
    /// The instruction body failed to parse or has a bad length.
    Parse(ParseError),
}

impl fmt::Display for CreateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreateError::InvalidMemorySize(size) => write!(
                f,
                "memory size {size} must be a power of two between 64 and 65536"
            ),
            CreateError::NameConflict(name) => {
                write!(f, "a process named `{name}` already exists")
            }
            CreateError::Parse(e) => write!(f, "bad instruction body: {e}"),
        }
    }
}

impl std::error::Error for CreateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CreateError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ParseError> for CreateError {
    fn from(e: ParseError) -> Self {
        CreateError::Parse(e)
    }
}

/// The whole emulator: one value owning every subsystem. Constructing it is
/// `initialize`; dropping it stops the scheduler and joins every thread.
pub struct System {
    config: Config,
    seed: u64,
    next_pid: AtomicU32,
    shared: Arc<Shared>,
    admission: Mutex<Option<JoinHandle<()>>>,
}

impl System {
    /// Initialize from a validated configuration, writing all files to the
    /// current directory.
    pub fn new(config: Config) -> Result<Self> {
        Self::configure(config, ".", None)
    }

    /// Initialize with an explicit output directory for logs, reports, and
    /// the backing store, and an optional generator seed.
    pub fn configure(config: Config, out_dir: impl AsRef<Path>, seed: Option<u64>) -> Result<Self> {
        let out_dir: PathBuf = out_dir.as_ref().into();
        std::fs::create_dir_all(&out_dir)
            .with_context(|| format!("creating output directory {}", out_dir.display()))?;
        let memory = MemoryManager::new(
            config.max_overall_mem,
            config.mem_per_frame,
            out_dir.join("csopesy-backing-store.txt"),
        );
        let shared = Arc::new(Shared {
            config: config.clone(),
            out_dir,
            memory,
            counters: Counters::default(),
            processes: Mutex::new(Vec::new()),
            waiting: Mutex::new(VecDeque::new()),
            mem_cv: Condvar::new(),
            ready: Mutex::new(VecDeque::new()),
            ready_cv: Condvar::new(),
            stopping: AtomicBool::new(false),
        });
        Ok(Self {
            config,
            seed: seed.unwrap_or_else(rand::random),
            next_pid: AtomicU32::new(1),
            shared,
            admission: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.admission.lock().unwrap().is_some()
    }

    /// Validate and register a new process; when the scheduler is running it
    /// is queued for admission immediately, otherwise the next `start` will
    /// queue it.
    pub fn create_process(
        &self,
        name: &str,
        mem_size: usize,
        body: &str,
    ) -> std::result::Result<Pid, CreateError> {
        if !valid_proc_mem(mem_size) {
            return Err(CreateError::InvalidMemorySize(mem_size));
        }
        let instructions = parse_program(body)?;
        if instructions.len() > 50 {
            return Err(CreateError::Parse(ParseError::new(
                0,
                format!(
                    "program must contain at most 50 instructions, got {}",
                    instructions.len()
                ),
            )));
        }

        let mut processes = self.shared.processes.lock().unwrap();
        if processes
            .iter()
            .any(|h| h.lock().unwrap().name == name)
        {
            return Err(CreateError::NameConflict(name.to_string()));
        }
        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        let process = Process::new(pid, name, mem_size, instructions);
        let handle = process.handle();
        processes.push(Arc::clone(&handle));
        drop(processes);

        self.shared.memory.register_process(pid, mem_size);
        if self.is_running() {
            self.enqueue_waiting(handle);
        }
        log::info!("created pid={pid} `{name}` ({mem_size} bytes)");
        Ok(pid)
    }

    fn enqueue_waiting(&self, handle: ProcessHandle) {
        handle.lock().unwrap().status = ProcessStatus::WaitingForMemory;
        let mut waiting = self.shared.waiting.lock().unwrap();
        waiting.push_back(handle);
        self.shared.mem_cv.notify_all();
    }

    /// Start a scheduler run: reset the queues, synthesize a workload if
    /// there are no processes yet, queue every unfinished process, and
    /// spawn the admission thread (which spawns the workers).
    pub fn start(&self) -> Result<()> {
        let mut admission = self.admission.lock().unwrap();
        if admission.is_some() {
            bail!("scheduler is already running");
        }

        self.shared.ready.lock().unwrap().clear();
        self.shared.waiting.lock().unwrap().clear();

        if self.shared.processes.lock().unwrap().is_empty() {
            self.synthesize_processes(10);
        }

        // Reset page tables to all-invalid and queue every unfinished
        // process in creation order.
        let handles: Vec<ProcessHandle> = self
            .shared
            .processes
            .lock()
            .unwrap()
            .iter()
            .map(Arc::clone)
            .collect();
        let mut queued = Vec::new();
        for handle in handles {
            let mut p = handle.lock().unwrap();
            if p.is_terminal() {
                continue;
            }
            self.shared.memory.register_process(p.pid, p.mem_size);
            p.status = ProcessStatus::WaitingForMemory;
            p.core = -1;
            drop(p);
            queued.push(handle);
        }
        self.shared.waiting.lock().unwrap().extend(queued);

        self.shared.stopping.store(false, Ordering::Release);
        *admission = Some(spawn_scheduler(Arc::clone(&self.shared)));
        log::info!("scheduler started ({} cores)", self.config.num_cpu);
        Ok(())
    }

    /// Stop the scheduler and join every thread it spawned. Safe to call
    /// when nothing is running.
    pub fn stop(&self) {
        let handle = self.admission.lock().unwrap().take();
        let Some(handle) = handle else { return };
        self.shared.stopping.store(true, Ordering::Release);
        {
            let _guard = self.shared.waiting.lock().unwrap();
            self.shared.mem_cv.notify_all();
        }
        {
            let _guard = self.shared.ready.lock().unwrap();
            self.shared.ready_cv.notify_all();
        }
        let _ = handle.join();
        log::info!("scheduler stopped");
    }

    fn synthesize_processes(&self, count: usize) {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut processes = self.shared.processes.lock().unwrap();
        for i in 0..count {
            let name = format!("p{:02}", i + 1);
            let mem_size = generator::random_memory_size(&self.config, &mut rng);
            let program = generator::random_program(&self.config, &mut rng, mem_size);
            let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
            let process = Process::new(pid, name, mem_size, program);
            self.shared.memory.register_process(pid, mem_size);
            processes.push(process.handle());
        }
        log::info!("synthesized {count} processes (seed {})", self.seed);
    }

    /// Look a process up by name.
    pub fn find(&self, name: &str) -> Option<ProcessHandle> {
        self.shared
            .processes
            .lock()
            .unwrap()
            .iter()
            .find(|h| h.lock().unwrap().name == name)
            .map(Arc::clone)
    }

    /// The live status report backing `screen -ls`-style queries.
    pub fn list(&self) -> StatusReport {
        let mut running = Vec::new();
        let mut waiting = Vec::new();
        let mut finished = Vec::new();
        {
            let processes = self.shared.processes.lock().unwrap();
            for handle in processes.iter() {
                let p = handle.lock().unwrap();
                let info = process_info(&p);
                match p.status {
                    ProcessStatus::Running => running.push(info),
                    ProcessStatus::Finished | ProcessStatus::Violated => finished.push(info),
                    _ => waiting.push(info),
                }
            }
        }

        let cores_total = self.config.num_cpu;
        let cores_used = running.len().min(cores_total);
        let mem_total = self.config.max_overall_mem;
        let mem_used = self.shared.memory.used_bytes();
        StatusReport {
            cpu_utilization: percent(cores_used, cores_total),
            cores_used,
            cores_available: cores_total - cores_used,
            cores_total,
            mem_used_bytes: mem_used,
            mem_total_bytes: mem_total,
            mem_utilization: percent(mem_used, mem_total),
            running,
            waiting,
            finished,
        }
    }

    /// Write the `csopesy-log.txt` utilization report; returns its path.
    pub fn report_util(&self) -> Result<PathBuf> {
        report::write_report_util(&self.shared, &self.list())
    }

    pub fn vmstat(&self) -> VmStat {
        let stats = self.shared.memory.stats();
        VmStat {
            total_memory: stats.total_bytes,
            used_memory: stats.used_bytes(),
            free_memory: stats.total_bytes - stats.used_bytes(),
            total_frames: stats.total_frames,
            used_frames: stats.used_frames,
            free_frames: stats.free_frames(),
            idle_ticks: self.shared.counters.idle_ticks(),
            active_ticks: self.shared.counters.active_ticks(),
            total_ticks: self.shared.counters.total_ticks(),
            pages_paged_in: self.shared.memory.pages_paged_in(),
            pages_paged_out: self.shared.memory.pages_paged_out(),
        }
    }

    /// Write a `memory_stamp_NN.txt` snapshot for an explicit cycle number.
    pub fn memory_snapshot(&self, cycle: u64) {
        self.shared.write_memory_snapshot(cycle);
    }

    /// Block until every registered process reaches a terminal state, up to
    /// `timeout`. Returns whether the workload drained completely.
    pub fn wait_for_completion(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let all_done = {
                let processes = self.shared.processes.lock().unwrap();
                !processes.is_empty()
                    && processes.iter().all(|h| h.lock().unwrap().is_terminal())
            };
            if all_done {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Drop for System {
    fn drop(&mut self) {
        self.stop();
    }
}

fn process_info(p: &Process) -> ProcessInfo {
    ProcessInfo {
        pid: p.pid,
        name: p.name.clone(),
        status: p.status.to_string(),
        core: p.core,
        tasks_completed: p.tasks_completed,
        total_tasks: p.total_tasks,
        mem_size: p.mem_size,
        started: p.start_time.map(|t| t.format(TIMESTAMP_FORMAT).to_string()),
        ended: p.end_time.map(|t| t.format(TIMESTAMP_FORMAT).to_string()),
        violation_address: p.violation_address.clone(),
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}
