use memory::MemoryManager;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use vm::{execute_step, parse_program, ExecContext, Process, ProcessLog, ProcessStatus, StepResult};

static NEXT_ID: AtomicU32 = AtomicU32::new(0);

fn temp_path(tag: &str) -> PathBuf {
    let n = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("interp-{tag}-{}-{n}", std::process::id()))
}

fn manager(tag: &str, total: usize, frame: usize) -> MemoryManager {
    let path = temp_path(tag).with_extension("txt");
    let _ = fs::remove_file(&path);
    MemoryManager::new(total, frame, path)
}

fn run_to_end(p: &mut Process, mm: &MemoryManager) -> StepResult {
    let mut log = ProcessLog::sink();
    let mut last = StepResult::Continue;
    while p.pc < p.instructions.len() {
        let mut ctx = ExecContext {
            core: 0,
            memory: mm,
            delay: Duration::ZERO,
            log: &mut log,
        };
        last = execute_step(p, &mut ctx);
        if last == StepResult::Terminated {
            break;
        }
    }
    last
}

fn process(tag: &str, mem: usize, body: &str) -> (Process, MemoryManager) {
    let mm = manager(tag, 4 * mem, 64);
    let program = parse_program(body).unwrap();
    let p = Process::new(1, format!("proc-{tag}"), mem, program);
    mm.register_process(p.pid, p.mem_size);
    (p, mm)
}

#[test]
fn declare_write_read_print_round_trip() {
    let (mut p, mm) = process("roundtrip", 64, "DECLARE x 42; WRITE 32 x; READ y 32");
    run_to_end(&mut p, &mm);
    assert_eq!(p.status, ProcessStatus::New); // terminal status is the scheduler's call
    assert_eq!(p.tasks_completed, 3);
    let y = p.lookup("y").unwrap();
    assert_eq!(mm.read_word(p.pid, y).unwrap(), 42);
}

#[test]
fn add_and_subtract_wrap_modulo_sixteen_bits() {
    let (mut p, mm) = process(
        "wrap",
        64,
        "DECLARE a 65535; ADD a 2; DECLARE b 0; SUBTRACT b 1",
    );
    run_to_end(&mut p, &mm);
    assert_eq!(mm.read_word(p.pid, p.lookup("a").unwrap()).unwrap(), 1);
    assert_eq!(mm.read_word(p.pid, p.lookup("b").unwrap()).unwrap(), 65535);
}

#[test]
fn three_operand_add_truncates_the_wide_sum() {
    let (mut p, mm) = process(
        "add3",
        64,
        "DECLARE a 60000; DECLARE b 60000; ADD sum a b",
    );
    run_to_end(&mut p, &mm);
    let expected = ((60000u32 + 60000u32) & 0xFFFF) as u16;
    assert_eq!(
        mm.read_word(p.pid, p.lookup("sum").unwrap()).unwrap(),
        expected
    );
}

#[test]
fn add_auto_declares_missing_operands_as_zero() {
    let (mut p, mm) = process("autodecl", 64, "ADD sum a b");
    run_to_end(&mut p, &mm);
    assert_eq!(p.lookup("a").unwrap(), 0);
    assert_eq!(p.lookup("b").unwrap(), 2);
    assert_eq!(mm.read_word(p.pid, p.lookup("sum").unwrap()).unwrap(), 0);
}

#[test]
fn write_of_undeclared_variable_stores_zero() {
    let (mut p, mm) = process("undeclared", 64, "WRITE 32 ghost");
    run_to_end(&mut p, &mm);
    assert_eq!(mm.read_word(p.pid, 32).unwrap(), 0);
    assert!(p.lookup("ghost").is_none());
}

#[test]
fn last_byte_is_readable_but_one_past_violates() {
    let (mut p, mm) = process("edge-ok", 128, "READ v 127");
    assert_eq!(run_to_end(&mut p, &mm), StepResult::Continue);
    assert!(!p.is_terminal());

    let (mut p, mm) = process("edge-bad", 128, "READ v 128");
    assert_eq!(run_to_end(&mut p, &mm), StepResult::Terminated);
    assert_eq!(p.status, ProcessStatus::Violated);
    assert_eq!(p.violation_address.as_deref(), Some("0x80"));
    // PC stays on the faulting instruction.
    assert_eq!(p.pc, 0);
}

#[test]
fn violation_line_reports_op_and_valid_range() {
    let dir = temp_path("viol-dir");
    fs::create_dir_all(&dir).unwrap();
    let mm = manager("viol", 256, 64);
    let program = parse_program("WRITE 4096 x").unwrap();
    let mut p = Process::new(7, "violator", 128, program);
    mm.register_process(p.pid, p.mem_size);

    let mut log = ProcessLog::open(&dir, &p.name).unwrap();
    let mut ctx = ExecContext {
        core: 2,
        memory: &mm,
        delay: Duration::ZERO,
        log: &mut log,
    };
    assert_eq!(execute_step(&mut p, &mut ctx), StepResult::Terminated);
    drop(ctx);
    drop(log);

    let text = fs::read_to_string(dir.join("violator.txt")).unwrap();
    assert!(text.contains(
        "MEMORY VIOLATION on WRITE at 0x1000. Valid range: 0x0 - 0x7F. Process terminated."
    ));
    assert!(text.contains("Core:2"));
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn thirty_third_declare_is_ignored_and_uncounted() {
    let body: Vec<String> = (0..40).map(|i| format!("DECLARE v{i} {i}")).collect();
    let (mut p, mm) = process("fulltable", 64, &body.join("; "));
    run_to_end(&mut p, &mm);
    assert_eq!(p.tasks_completed, 32);
    assert_eq!(p.pc, 40); // ignored instructions still advance the PC
    assert!(p.lookup("v31").is_some());
    assert!(p.lookup("v32").is_none());
}

#[test]
fn ignored_declares_are_logged() {
    let dir = temp_path("ignored-dir");
    fs::create_dir_all(&dir).unwrap();
    let mm = manager("ignored", 256, 64);
    let body: Vec<String> = (0..40).map(|i| format!("DECLARE v{i} {i}")).collect();
    let mut p = Process::new(3, "fullsym", 64, parse_program(&body.join("; ")).unwrap());
    mm.register_process(p.pid, p.mem_size);

    let mut log = ProcessLog::open(&dir, &p.name).unwrap();
    while p.pc < p.instructions.len() {
        let mut ctx = ExecContext {
            core: 0,
            memory: &mm,
            delay: Duration::ZERO,
            log: &mut log,
        };
        execute_step(&mut p, &mut ctx);
    }
    drop(log);

    let text = fs::read_to_string(dir.join("fullsym.txt")).unwrap();
    let ignored = text.lines().filter(|l| l.contains("ignored")).count();
    assert_eq!(ignored, 8);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn print_appends_value_or_sentinel() {
    let dir = temp_path("print-dir");
    fs::create_dir_all(&dir).unwrap();
    let mm = manager("print", 256, 64);
    let program = parse_program("DECLARE y 42; PRINT \"v=\" + y; PRINT \"w=\" + w").unwrap();
    let mut p = Process::new(4, "printer", 64, program);
    mm.register_process(p.pid, p.mem_size);

    let mut log = ProcessLog::open(&dir, &p.name).unwrap();
    while p.pc < p.instructions.len() {
        let mut ctx = ExecContext {
            core: 0,
            memory: &mm,
            delay: Duration::ZERO,
            log: &mut log,
        };
        execute_step(&mut p, &mut ctx);
    }
    drop(log);

    let text = fs::read_to_string(dir.join("printer.txt")).unwrap();
    assert!(text.contains("\"v=42\""));
    assert!(text.contains("\"w=?\""));
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn for_loop_counts_itself_plus_every_body_instruction() {
    let (mut p, mm) = process("loop", 64, "DECLARE x 0; FOR_LOOP 5 [ADD x 2]");
    run_to_end(&mut p, &mm);
    assert_eq!(p.tasks_completed, 1 + 1 + 5);
    assert_eq!(p.tasks_completed, p.total_tasks);
    assert_eq!(mm.read_word(p.pid, p.lookup("x").unwrap()).unwrap(), 10);
}

#[test]
fn violation_inside_loop_body_terminates_the_loop() {
    let (mut p, mm) = process("loopviol", 64, "FOR_LOOP 10 [ADD x 1; READ y 999]");
    assert_eq!(run_to_end(&mut p, &mm), StepResult::Terminated);
    assert_eq!(p.status, ProcessStatus::Violated);
    assert_eq!(p.violation_address.as_deref(), Some("0x3E7"));
    // Only the first body op completed; the terminated loop itself does
    // not count.
    assert_eq!(p.tasks_completed, 1);
}

#[test]
fn values_survive_eviction_between_write_and_read() {
    // One frame: page 0 (symbols) and page 1 (data) evict each other on
    // every access.
    let (mut p, mm) = process_with_memory("thrash", 64, 128, 64, "DECLARE x 42; WRITE 64 x; READ y 64");
    run_to_end(&mut p, &mm);
    assert_eq!(mm.read_word(p.pid, p.lookup("y").unwrap()).unwrap(), 42);
    assert!(mm.pages_paged_out() >= 1);
}

fn process_with_memory(
    tag: &str,
    total: usize,
    mem: usize,
    frame: usize,
    body: &str,
) -> (Process, MemoryManager) {
    let path = temp_path(tag).with_extension("txt");
    let _ = fs::remove_file(&path);
    let mm = MemoryManager::new(total, frame, path);
    let program = parse_program(body).unwrap();
    let p = Process::new(1, format!("proc-{tag}"), mem, program);
    mm.register_process(p.pid, p.mem_size);
    (p, mm)
}
