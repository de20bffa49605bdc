//! Executes one instruction of a process on behalf of a worker core.
//!
//! Every memory access funnels through the memory manager, so residency,
//! page faults, and eviction are exercised by exactly the instructions that
//! touch memory: symbol-table traffic faults in page 0, READ/WRITE fault in
//! the page containing the target byte.

use memory::{AllocError, MemoryManager};
use std::time::Duration;

use crate::exec_log::ProcessLog;
use crate::instruction::Instruction;
use crate::process::{Process, ProcessStatus};

/// Outcome of one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// Executed; PC advanced; counted as a completed task.
    Continue,
    /// Skipped (symbol table full); PC advanced; not counted.
    Ignored,
    /// Memory violation; the process is terminated where it stands.
    Terminated,
}

/// Per-slice execution environment handed to the interpreter by a worker.
pub struct ExecContext<'a> {
    pub core: usize,
    pub memory: &'a MemoryManager,
    /// Simulated cycle cost per executed opcode.
    pub delay: Duration,
    pub log: &'a mut ProcessLog,
}

/// Execute the instruction at the process's PC. On `Continue`/`Ignored` the
/// PC advances; on `Terminated` it stays put and the process is marked
/// violated.
pub fn execute_step(process: &mut Process, ctx: &mut ExecContext<'_>) -> StepResult {
    debug_assert!(process.pc < process.instructions.len());
    let instr = process.instructions[process.pc].clone();
    let result = exec_one(process, &instr, ctx);
    if !matches!(result, StepResult::Terminated) {
        process.pc += 1;
    }
    result
}

fn exec_one(p: &mut Process, instr: &Instruction, ctx: &mut ExecContext<'_>) -> StepResult {
    match instr {
        Instruction::Print { message, var } => {
            let payload = match var {
                None => format!("\"{message}\""),
                Some(name) => match p.lookup(name) {
                    // Undeclared variables print the sentinel instead of a value.
                    None => format!("\"{message}?\""),
                    Some(offset) => match ctx.memory.read_word(p.pid, offset) {
                        Ok(value) => format!("\"{message}{value}\""),
                        Err(e) => return violate(p, ctx, "PRINT", i64::from(offset), e),
                    },
                },
            };
            ctx.log.line(ctx.core, &payload);
            complete(p, ctx)
        }

        Instruction::Declare { var, value } => {
            let Some(offset) = p.declare(var) else {
                return ignored(ctx, "DECLARE", var);
            };
            if let Err(e) = ctx.memory.write_word(p.pid, offset, *value) {
                return violate(p, ctx, "DECLARE", i64::from(offset), e);
            }
            ctx.log
                .line(ctx.core, &format!("DECLARE {var} = {value} at offset {offset}"));
            complete(p, ctx)
        }

        Instruction::Add { var, value } => {
            let Some(offset) = p.declare(var) else {
                return ignored(ctx, "ADD", var);
            };
            let current = match ctx.memory.read_word(p.pid, offset) {
                Ok(v) => v,
                Err(e) => return violate(p, ctx, "ADD", i64::from(offset), e),
            };
            let result = ((u32::from(current) + u32::from(*value)) & 0xFFFF) as u16;
            if let Err(e) = ctx.memory.write_word(p.pid, offset, result) {
                return violate(p, ctx, "ADD", i64::from(offset), e);
            }
            ctx.log
                .line(ctx.core, &format!("ADD {value} to {var} (result: {result})"));
            complete(p, ctx)
        }

        Instruction::AddVars { dst, lhs, rhs } => {
            let (Some(lhs_off), Some(rhs_off), Some(dst_off)) =
                (p.declare(lhs), p.declare(rhs), p.declare(dst))
            else {
                return ignored(ctx, "ADD", dst);
            };
            let a = match ctx.memory.read_word(p.pid, lhs_off) {
                Ok(v) => v,
                Err(e) => return violate(p, ctx, "ADD", i64::from(lhs_off), e),
            };
            let b = match ctx.memory.read_word(p.pid, rhs_off) {
                Ok(v) => v,
                Err(e) => return violate(p, ctx, "ADD", i64::from(rhs_off), e),
            };
            // Sum in 32 bits, then truncate to the 16-bit store width.
            let result = ((u32::from(a) + u32::from(b)) & 0xFFFF) as u16;
            if let Err(e) = ctx.memory.write_word(p.pid, dst_off, result) {
                return violate(p, ctx, "ADD", i64::from(dst_off), e);
            }
            ctx.log.line(
                ctx.core,
                &format!("ADD {lhs} + {rhs} into {dst} (result: {result})"),
            );
            complete(p, ctx)
        }

        Instruction::Subtract { var, value } => {
            let Some(offset) = p.declare(var) else {
                return ignored(ctx, "SUBTRACT", var);
            };
            let current = match ctx.memory.read_word(p.pid, offset) {
                Ok(v) => v,
                Err(e) => return violate(p, ctx, "SUBTRACT", i64::from(offset), e),
            };
            let result = (i32::from(current) - i32::from(*value)).rem_euclid(1 << 16) as u16;
            if let Err(e) = ctx.memory.write_word(p.pid, offset, result) {
                return violate(p, ctx, "SUBTRACT", i64::from(offset), e);
            }
            ctx.log.line(
                ctx.core,
                &format!("SUBTRACT {value} from {var} (result: {result})"),
            );
            complete(p, ctx)
        }

        Instruction::Read { var, addr } => {
            let addr = match checked_addr(p, ctx, "READ", *addr) {
                Ok(a) => a,
                Err(r) => return r,
            };
            let Some(offset) = p.declare(var) else {
                return ignored(ctx, "READ", var);
            };
            let value = match ctx.memory.read_word(p.pid, addr) {
                Ok(v) => v,
                Err(e) => return violate(p, ctx, "READ", i64::from(addr), e),
            };
            if let Err(e) = ctx.memory.write_word(p.pid, offset, value) {
                return violate(p, ctx, "READ", i64::from(offset), e);
            }
            ctx.log.line(
                ctx.core,
                &format!("READ {value} from 0x{addr:04X} into {var}"),
            );
            complete(p, ctx)
        }

        Instruction::Write { addr, var } => {
            let addr = match checked_addr(p, ctx, "WRITE", *addr) {
                Ok(a) => a,
                Err(r) => return r,
            };
            let value = match p.lookup(var) {
                Some(offset) => match ctx.memory.read_word(p.pid, offset) {
                    Ok(v) => v,
                    Err(e) => return violate(p, ctx, "WRITE", i64::from(offset), e),
                },
                None => 0,
            };
            if let Err(e) = ctx.memory.write_word(p.pid, addr, value) {
                return violate(p, ctx, "WRITE", i64::from(addr), e);
            }
            ctx.log.line(
                ctx.core,
                &format!("WRITE {value} (from {var}) to 0x{addr:04X}"),
            );
            complete(p, ctx)
        }

        Instruction::ForLoop { count, body } => {
            for _ in 0..*count {
                for inner in body {
                    if exec_one(p, inner, ctx) == StepResult::Terminated {
                        return StepResult::Terminated;
                    }
                }
            }
            // The loop itself counts as one completed task, but only once
            // every iteration of its body has run.
            p.tasks_completed += 1;
            StepResult::Continue
        }
    }
}

/// Validate a byte address against the process's address space.
fn checked_addr(
    p: &mut Process,
    ctx: &mut ExecContext<'_>,
    op: &str,
    addr: i64,
) -> Result<u32, StepResult> {
    if addr < 0 || addr >= p.mem_size as i64 {
        Err(violate_addr(p, ctx, op, addr))
    } else {
        Ok(addr as u32)
    }
}

fn violate(
    p: &mut Process,
    ctx: &mut ExecContext<'_>,
    op: &str,
    addr: i64,
    cause: AllocError,
) -> StepResult {
    log::warn!("pid={} {op}: {cause}", p.pid);
    violate_addr(p, ctx, op, addr)
}

fn violate_addr(p: &mut Process, ctx: &mut ExecContext<'_>, op: &str, addr: i64) -> StepResult {
    let addr_text = format_addr(addr);
    p.status = ProcessStatus::Violated;
    p.violation_address = Some(addr_text.clone());
    ctx.log.line(
        ctx.core,
        &format!(
            "MEMORY VIOLATION on {op} at {addr_text}. Valid range: 0x0 - 0x{:X}. Process terminated.",
            p.mem_size - 1
        ),
    );
    // A violating opcode still spends its simulated cycle; only Ignored
    // opcodes skip the sleep.
    simulate_cycle(ctx);
    StepResult::Terminated
}

fn format_addr(addr: i64) -> String {
    if addr < 0 {
        format!("-0x{:X}", addr.unsigned_abs())
    } else {
        format!("0x{addr:X}")
    }
}

fn ignored(ctx: &mut ExecContext<'_>, op: &str, var: &str) -> StepResult {
    ctx.log
        .line(ctx.core, &format!("{op} {var} ignored (symbol table full)"));
    StepResult::Ignored
}

fn complete(p: &mut Process, ctx: &ExecContext<'_>) -> StepResult {
    p.tasks_completed += 1;
    simulate_cycle(ctx);
    StepResult::Continue
}

fn simulate_cycle(ctx: &ExecContext<'_>) {
    if !ctx.delay.is_zero() {
        std::thread::sleep(ctx.delay);
    }
}
