//! Status report, vmstat, and snapshot/report file rendering.

use chrono::Local;
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::scheduler::Shared;

pub(crate) const TIMESTAMP_FORMAT: &str = "%m/%d/%Y %I:%M:%S %p";

/// One process as seen by `list`/`report-util`.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub status: String,
    /// Core the process is executing on; -1 when not running.
    pub core: i32,
    pub tasks_completed: u64,
    pub total_tasks: u64,
    pub mem_size: usize,
    pub started: Option<String>,
    pub ended: Option<String>,
    pub violation_address: Option<String>,
}

/// Everything `list` returns: utilization figures plus the three ordered
/// process groups.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub cpu_utilization: f64,
    pub cores_used: usize,
    pub cores_available: usize,
    pub cores_total: usize,
    pub mem_used_bytes: usize,
    pub mem_total_bytes: usize,
    pub mem_utilization: f64,
    pub running: Vec<ProcessInfo>,
    pub waiting: Vec<ProcessInfo>,
    pub finished: Vec<ProcessInfo>,
}

/// Memory and paging statistics in the shape `vmstat` reports them.
#[derive(Debug, Clone, Serialize)]
pub struct VmStat {
    pub total_memory: usize,
    pub used_memory: usize,
    pub free_memory: usize,
    pub total_frames: usize,
    pub used_frames: usize,
    pub free_frames: usize,
    pub idle_ticks: u64,
    pub active_ticks: u64,
    pub total_ticks: u64,
    pub pages_paged_in: u64,
    pub pages_paged_out: u64,
}

pub(crate) fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Render the status report the way `csopesy-log.txt` and the console show
/// it.
pub fn render_status(report: &StatusReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "CPU utilization: {:.0}%", report.cpu_utilization);
    let _ = writeln!(out, "Cores used: {}", report.cores_used);
    let _ = writeln!(out, "Cores available: {}", report.cores_available);
    let _ = writeln!(
        out,
        "Memory: {} / {} bytes ({:.0}%)",
        report.mem_used_bytes, report.mem_total_bytes, report.mem_utilization
    );
    let _ = writeln!(out, "{}", "-".repeat(50));
    let _ = writeln!(out, "Running processes:");
    for p in &report.running {
        let _ = writeln!(
            out,
            "{:<12} ({})  Core: {}   {} / {}   mem: {}",
            p.name,
            p.started.as_deref().unwrap_or("-"),
            p.core,
            p.tasks_completed,
            p.total_tasks,
            p.mem_size
        );
    }
    let _ = writeln!(out, "\nWaiting for memory:");
    for p in &report.waiting {
        let _ = writeln!(
            out,
            "{:<12} {}   {} / {}   mem: {}",
            p.name, p.status, p.tasks_completed, p.total_tasks, p.mem_size
        );
    }
    let _ = writeln!(out, "\nFinished processes:");
    for p in &report.finished {
        let fate = match &p.violation_address {
            Some(addr) => format!("Violated at {addr}"),
            None => "Finished".to_string(),
        };
        let _ = writeln!(
            out,
            "{:<12} ({})  {}   {} / {}",
            p.name,
            p.ended.as_deref().unwrap_or("-"),
            fate,
            p.tasks_completed,
            p.total_tasks
        );
    }
    let _ = writeln!(out, "{}", "-".repeat(50));
    out
}

/// Write the utilization report file; same content as `list` with a
/// generation header.
pub(crate) fn write_report_util(shared: &Shared, report: &StatusReport) -> Result<PathBuf> {
    let path = shared.out_dir.join("csopesy-log.txt");
    let text = format!("Generated: {}\n\n{}", timestamp(), render_status(report));
    fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

struct SnapshotEntry {
    name: String,
    mem_size: usize,
}

/// Write `memory_stamp_NN.txt`: a header with residency figures, then the
/// live-process ranges stacked downward from the top of physical memory,
/// printed in descending end-address order.
pub(crate) fn write_memory_snapshot(shared: &Shared, cycle: u64) -> Result<()> {
    let stats = shared.memory.stats();

    // Live processes that currently hold at least one frame, ascending by
    // pid so consecutive snapshots agree without intervening instructions.
    let mut entries: Vec<SnapshotEntry> = Vec::new();
    {
        let processes = shared.processes.lock().unwrap();
        for handle in processes.iter() {
            let p = handle.lock().unwrap();
            if p.is_terminal() {
                continue;
            }
            if stats.resident.iter().any(|&(pid, _)| pid == p.pid) {
                entries.push(SnapshotEntry {
                    name: p.name.clone(),
                    mem_size: p.mem_size,
                });
            }
        }
    }

    let total = shared.config.max_overall_mem;
    let pages_in_memory: usize = stats.resident.iter().map(|&(_, pages)| pages).sum();

    let mut out = String::new();
    let _ = writeln!(out, "Timestamp: ({})", timestamp());
    let _ = writeln!(out, "Number of processes in memory: {}", entries.len());
    let _ = writeln!(out, "Total pages in memory: {pages_in_memory}");
    let _ = writeln!(out, "Free frames: {}", stats.free_frames());
    // Every resident process gets a range so the list agrees with the
    // header count. Admission never waits for free memory, so the stacked
    // sizes can overshoot physical memory; the cursor clamps at 0 and the
    // overcommitted tail shows a truncated range.
    let mut cursor = total;
    let mut ranges = Vec::new();
    for entry in &entries {
        let end = cursor;
        cursor = cursor.saturating_sub(entry.mem_size);
        ranges.push((end, entry.name.clone(), cursor));
    }
    let _ = writeln!(
        out,
        "Total external fragmentation in KB: {}",
        cursor / 1024
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "----end---- = {total}");
    for (end, name, start) in &ranges {
        let _ = writeln!(out);
        let _ = writeln!(out, "{end}");
        let _ = writeln!(out, "{name}");
        let _ = writeln!(out, "{start}");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "----start-- = 0");

    let path = shared.out_dir.join(format!("memory_stamp_{cycle:02}.txt"));
    fs::write(&path, out).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
