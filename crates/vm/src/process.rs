use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::instruction::Instruction;

pub type Pid = u32;

/// Shared-owned process record; queues and the registry carry handles, one
/// worker owns the record between dequeue and requeue or termination.
pub type ProcessHandle = Arc<Mutex<Process>>;

/// Size of the reserved symbol-table page region, in bytes.
pub const SYMBOL_TABLE_BYTES: u32 = 64;
/// Bytes per symbol-table slot; one 16-bit value each.
pub const SYMBOL_SLOT_BYTES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    New,
    WaitingForMemory,
    Ready,
    Running,
    Finished,
    Violated,
}

impl ProcessStatus {
    /// Finished and Violated are terminal; everything else can still run.
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessStatus::Finished | ProcessStatus::Violated)
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessStatus::New => "New",
            ProcessStatus::WaitingForMemory => "Waiting for memory",
            ProcessStatus::Ready => "Ready",
            ProcessStatus::Running => "Running",
            ProcessStatus::Finished => "Finished",
            ProcessStatus::Violated => "Violated",
        };
        f.write_str(name)
    }
}

/// Everything the scheduler and interpreter need to know about one emulated
/// process. Page tables and page contents live in the memory manager, keyed
/// by pid; this record holds only scheduler-visible state plus the symbol
/// table (variable name -> byte offset inside page 0).
#[derive(Debug)]
pub struct Process {
    pub pid: Pid,
    pub name: String,
    pub mem_size: usize,
    pub instructions: Vec<Instruction>,
    pub pc: usize,
    pub symbols: HashMap<String, u32>,
    pub next_var_offset: u32,
    pub status: ProcessStatus,
    pub start_time: Option<DateTime<Local>>,
    pub end_time: Option<DateTime<Local>>,
    /// Core currently executing this process; -1 when unassigned.
    pub core: i32,
    pub tasks_completed: u64,
    pub total_tasks: u64,
    pub violation_address: Option<String>,
}

impl Process {
    pub fn new(pid: Pid, name: impl Into<String>, mem_size: usize, instructions: Vec<Instruction>) -> Self {
        let total_tasks = instructions.iter().map(Instruction::task_count).sum();
        Self {
            pid,
            name: name.into(),
            mem_size,
            instructions,
            pc: 0,
            symbols: HashMap::new(),
            next_var_offset: 0,
            status: ProcessStatus::New,
            start_time: None,
            end_time: None,
            core: -1,
            tasks_completed: 0,
            total_tasks,
            violation_address: None,
        }
    }

    pub fn handle(self) -> ProcessHandle {
        Arc::new(Mutex::new(self))
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn lookup(&self, var: &str) -> Option<u32> {
        self.symbols.get(var).copied()
    }

    /// Resolve `var` to its slot offset, allocating the next free slot for a
    /// fresh name. Returns `None` once all 32 slots are taken; the caller
    /// treats that as an ignored instruction.
    pub fn declare(&mut self, var: &str) -> Option<u32> {
        if let Some(offset) = self.lookup(var) {
            return Some(offset);
        }
        if self.next_var_offset >= SYMBOL_TABLE_BYTES {
            return None;
        }
        let offset = self.next_var_offset;
        self.next_var_offset += SYMBOL_SLOT_BYTES;
        self.symbols.insert(var.to_string(), offset);
        Some(offset)
    }
}
