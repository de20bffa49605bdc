use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Scheduling policy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPolicy {
    /// Run each process to completion (or violation) once dispatched.
    Fcfs,
    /// Preempt after `quantum-cycles` instructions and requeue.
    RoundRobin,
}

/// Immutable tunables loaded once at initialization from `config.txt`
/// (`key=value` per line, `#` comments, whitespace trimmed). Every key is
/// required; any missing key, unparseable value, or constraint failure
/// fails initialization and leaves the system uninitialized.
#[derive(Debug, Clone)]
pub struct Config {
    /// Worker-thread count.
    pub num_cpu: usize,
    pub scheduler: SchedulerPolicy,
    /// Round-Robin timeslice, in instructions.
    pub quantum_cycles: u64,
    /// Reserved auto-spawn cadence; validated but not acted on.
    pub batch_process_freq: u64,
    /// Instruction-count range for synthesized processes.
    pub min_ins: u64,
    pub max_ins: u64,
    /// Simulated per-instruction cost, in milliseconds.
    pub delay_per_exec: u64,
    /// Total physical memory, in bytes.
    pub max_overall_mem: usize,
    /// Frame size, in bytes.
    pub mem_per_frame: usize,
    /// Memory-size range for synthesized processes; powers of two.
    pub min_mem_per_proc: usize,
    pub max_mem_per_proc: usize,
}

/// Bounds on a process's address-space size, shared with `create_process`
/// validation.
pub const MIN_PROC_MEM: usize = 64;
pub const MAX_PROC_MEM: usize = 65536;

pub fn valid_proc_mem(bytes: usize) -> bool {
    bytes.is_power_of_two() && (MIN_PROC_MEM..=MAX_PROC_MEM).contains(&bytes)
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = HashMap::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                bail!("line {}: expected key=value, got `{line}`", lineno + 1);
            };
            entries.insert(key.trim().to_string(), value.trim().to_string());
        }

        let scheduler = match required(&entries, "scheduler")?.as_str() {
            "fcfs" => SchedulerPolicy::Fcfs,
            "rr" => SchedulerPolicy::RoundRobin,
            other => bail!("scheduler must be \"fcfs\" or \"rr\", got `{other}`"),
        };

        let config = Config {
            num_cpu: parse_key(&entries, "num-cpu")?,
            scheduler,
            quantum_cycles: parse_key(&entries, "quantum-cycles")?,
            batch_process_freq: parse_key(&entries, "batch-process-freq")?,
            min_ins: parse_key(&entries, "min-ins")?,
            max_ins: parse_key(&entries, "max-ins")?,
            delay_per_exec: parse_key(&entries, "delay-per-exec")?,
            max_overall_mem: parse_key(&entries, "max-overall-mem")?,
            mem_per_frame: parse_key(&entries, "mem-per-frame")?,
            min_mem_per_proc: parse_key(&entries, "min-mem-per-proc")?,
            max_mem_per_proc: parse_key(&entries, "max-mem-per-proc")?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.num_cpu == 0 {
            bail!("num-cpu must be positive");
        }
        if self.quantum_cycles == 0 {
            bail!("quantum-cycles must be positive");
        }
        if self.batch_process_freq == 0 {
            bail!("batch-process-freq must be positive");
        }
        if self.min_ins == 0 || self.max_ins < self.min_ins {
            bail!("min-ins/max-ins must be positive with max >= min");
        }
        if self.max_overall_mem == 0 {
            bail!("max-overall-mem must be positive");
        }
        if self.mem_per_frame == 0 || self.mem_per_frame > self.max_overall_mem {
            bail!("mem-per-frame must be positive and no larger than max-overall-mem");
        }
        if !valid_proc_mem(self.min_mem_per_proc) {
            bail!("min-mem-per-proc must be a power of two in [64, 65536]");
        }
        if !valid_proc_mem(self.max_mem_per_proc) {
            bail!("max-mem-per-proc must be a power of two in [64, 65536]");
        }
        if self.max_mem_per_proc < self.min_mem_per_proc {
            bail!("max-mem-per-proc must be >= min-mem-per-proc");
        }
        Ok(())
    }
}

fn required<'a>(entries: &'a HashMap<String, String>, key: &str) -> Result<&'a String> {
    entries
        .get(key)
        .with_context(|| format!("missing required option `{key}`"))
}

fn parse_key<T>(entries: &HashMap<String, String>, key: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    required(entries, key)?
        .parse()
        .with_context(|| format!("option `{key}` has an invalid value"))
}
