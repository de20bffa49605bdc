//! Ready queue, worker pool, and the admission thread.
//!
//! One admission thread owns the worker pool for the lifetime of a
//! `start`..`stop` run: it spawns the workers, drains the waiting queue
//! into the ready queue, and joins the workers on the way out. Workers
//! block on the ready-queue condvar; every enqueue signals it and shutdown
//! broadcasts it.
//!
//! Lock order, never violated: registry < process-state < waiting-queue <
//! ready-queue < memory-manager < backing-store.

use chrono::Local;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use memory::MemoryManager;
use vm::{execute_step, ExecContext, ProcessHandle, ProcessLog, ProcessStatus, StepResult};

use crate::config::{Config, SchedulerPolicy};
use crate::counters::Counters;
use crate::report;

/// How long the admission thread dozes when the waiting queue is empty.
const ADMISSION_NAP: Duration = Duration::from_millis(50);

/// State shared between the façade, the admission thread, and the workers.
pub(crate) struct Shared {
    pub config: Config,
    pub out_dir: PathBuf,
    pub memory: MemoryManager,
    pub counters: Counters,
    pub processes: Mutex<Vec<ProcessHandle>>,
    pub waiting: Mutex<VecDeque<ProcessHandle>>,
    /// Paired with `waiting`; the admission thread naps on it and a
    /// finishing process wakes it early.
    pub mem_cv: Condvar,
    pub ready: Mutex<VecDeque<ProcessHandle>>,
    pub ready_cv: Condvar,
    pub stopping: AtomicBool,
}

/// Spawn the admission thread for one scheduler run.
pub(crate) fn spawn_scheduler(shared: Arc<Shared>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("admission".into())
        .spawn(move || admission_loop(&shared))
        .expect("spawning admission thread")
}

fn admission_loop(shared: &Arc<Shared>) {
    let workers: Vec<JoinHandle<()>> = (0..shared.config.num_cpu)
        .map(|core| {
            let shared = Arc::clone(shared);
            thread::Builder::new()
                .name(format!("cpu-{core}"))
                .spawn(move || shared.worker_loop(core))
                .expect("spawning worker thread")
        })
        .collect();

    while !shared.stopping.load(Ordering::Acquire) {
        let next = shared.waiting.lock().unwrap().pop_front();
        match next {
            Some(handle) => {
                handle.lock().unwrap().status = ProcessStatus::Ready;
                let mut ready = shared.ready.lock().unwrap();
                ready.push_back(handle);
                shared.ready_cv.notify_one();
            }
            None => {
                let guard = shared.waiting.lock().unwrap();
                if shared.stopping.load(Ordering::Acquire) {
                    break;
                }
                let _ = shared.mem_cv.wait_timeout(guard, ADMISSION_NAP).unwrap();
            }
        }
    }

    // Let blocked workers observe the shutdown, then collect them.
    shared.ready_cv.notify_all();
    for worker in workers {
        let _ = worker.join();
    }
    log::debug!("admission thread exiting");
}

/// What a single executed instruction left behind.
enum Slice {
    Stepped,
    Finished,
    Violated,
}

impl Shared {
    fn worker_loop(&self, core: usize) {
        loop {
            let next = {
                let mut ready = self.ready.lock().unwrap();
                loop {
                    if let Some(handle) = ready.pop_front() {
                        break Some(handle);
                    }
                    if self.stopping.load(Ordering::Acquire) {
                        break None;
                    }
                    ready = self.ready_cv.wait(ready).unwrap();
                    if ready.is_empty() && !self.stopping.load(Ordering::Acquire) {
                        // Spurious or raced wake-up; account it as idle time.
                        self.counters.tick_idle();
                    }
                }
            };
            match next {
                Some(handle) => self.run_slice(core, handle),
                None => return,
            }
        }
    }

    /// Run one timeslice: the whole program under FCFS, at most
    /// `quantum-cycles` instructions under Round-Robin.
    fn run_slice(&self, core: usize, handle: ProcessHandle) {
        let name = {
            let mut p = handle.lock().unwrap();
            if p.start_time.is_none() {
                p.start_time = Some(Local::now());
            }
            p.status = ProcessStatus::Running;
            p.core = core as i32;
            p.name.clone()
        };

        let mut log = ProcessLog::open(&self.out_dir, &name).unwrap_or_else(|e| {
            log::error!("core {core}: {e:#}; discarding log lines for {name}");
            ProcessLog::sink()
        });

        let quantum = match self.config.scheduler {
            SchedulerPolicy::Fcfs => u64::MAX,
            SchedulerPolicy::RoundRobin => self.config.quantum_cycles,
        };
        let delay = Duration::from_millis(self.config.delay_per_exec);
        let mut executed = 0u64;

        loop {
            if self.stopping.load(Ordering::Acquire) {
                // Shutdown observed at an instruction boundary: put the
                // process back without marking it finished.
                let mut p = handle.lock().unwrap();
                p.status = ProcessStatus::Ready;
                p.core = -1;
                drop(p);
                self.ready.lock().unwrap().push_back(handle);
                return;
            }

            let outcome = {
                let mut p = handle.lock().unwrap();
                if p.pc >= p.instructions.len() {
                    Slice::Finished
                } else {
                    let mut ctx = ExecContext {
                        core,
                        memory: &self.memory,
                        delay,
                        log: &mut log,
                    };
                    match execute_step(&mut p, &mut ctx) {
                        StepResult::Terminated => Slice::Violated,
                        StepResult::Continue | StepResult::Ignored => {
                            if p.pc >= p.instructions.len() {
                                Slice::Finished
                            } else {
                                Slice::Stepped
                            }
                        }
                    }
                }
            };

            match outcome {
                Slice::Finished | Slice::Violated => {
                    self.retire(&handle);
                    return;
                }
                Slice::Stepped => {
                    self.counters.tick_active();
                    let cycle = self.counters.next_cycle();
                    self.write_memory_snapshot(cycle);

                    executed += 1;
                    if executed >= quantum {
                        let mut p = handle.lock().unwrap();
                        p.status = ProcessStatus::Ready;
                        p.core = -1;
                        drop(p);
                        let mut ready = self.ready.lock().unwrap();
                        ready.push_back(handle);
                        self.ready_cv.notify_one();
                        return;
                    }
                }
            }
        }
    }

    /// Terminal bookkeeping for a finished or violated process: end time,
    /// frame release (no page-out), and a nudge for the admission thread.
    fn retire(&self, handle: &ProcessHandle) {
        self.counters.tick_active();
        let cycle = self.counters.next_cycle();

        let pid = {
            let mut p = handle.lock().unwrap();
            if p.status != ProcessStatus::Violated {
                p.status = ProcessStatus::Finished;
            }
            p.end_time = Some(Local::now());
            p.core = -1;
            log::info!("pid={} `{}` {}", p.pid, p.name, p.status);
            p.pid
        };
        self.memory.release_process(pid);
        self.write_memory_snapshot(cycle);

        let _guard = self.waiting.lock().unwrap();
        self.mem_cv.notify_all();
    }

    /// Emit `memory_stamp_NN.txt` for the given cycle number.
    pub(crate) fn write_memory_snapshot(&self, cycle: u64) {
        if let Err(e) = report::write_memory_snapshot(self, cycle) {
            log::error!("memory snapshot {cycle} failed: {e:#}");
        }
    }
}
