use kernel::{Config, SchedulerPolicy};

const VALID: &str = "\
# scheduler tuning
num-cpu=4
scheduler=rr
quantum-cycles=5
batch-process-freq=1
min-ins=10
max-ins=50
delay-per-exec=0

# memory layout
max-overall-mem=16384
mem-per-frame=64
min-mem-per-proc=64
max-mem-per-proc=4096
";

#[test]
fn parses_a_complete_file() {
    let config = Config::parse(VALID).unwrap();
    assert_eq!(config.num_cpu, 4);
    assert_eq!(config.scheduler, SchedulerPolicy::RoundRobin);
    assert_eq!(config.quantum_cycles, 5);
    assert_eq!(config.min_ins, 10);
    assert_eq!(config.max_ins, 50);
    assert_eq!(config.delay_per_exec, 0);
    assert_eq!(config.max_overall_mem, 16384);
    assert_eq!(config.mem_per_frame, 64);
    assert_eq!(config.min_mem_per_proc, 64);
    assert_eq!(config.max_mem_per_proc, 4096);
}

#[test]
fn tolerates_comments_and_whitespace() {
    let text = VALID.replace("num-cpu=4", "  num-cpu = 4   # four workers");
    let config = Config::parse(&text).unwrap();
    assert_eq!(config.num_cpu, 4);
}

#[test]
fn every_key_is_required() {
    for key in [
        "num-cpu",
        "scheduler",
        "quantum-cycles",
        "batch-process-freq",
        "min-ins",
        "max-ins",
        "delay-per-exec",
        "max-overall-mem",
        "mem-per-frame",
        "min-mem-per-proc",
        "max-mem-per-proc",
    ] {
        let text: String = VALID
            .lines()
            .filter(|l| !l.starts_with(&format!("{key}=")))
            .map(|l| format!("{l}\n"))
            .collect();
        let err = Config::parse(&text).unwrap_err();
        assert!(err.to_string().contains(key), "expected error to name {key}");
    }
}

#[test]
fn rejects_bad_values() {
    for (from, to) in [
        ("scheduler=rr", "scheduler=lottery"),
        ("num-cpu=4", "num-cpu=0"),
        ("num-cpu=4", "num-cpu=four"),
        ("quantum-cycles=5", "quantum-cycles=0"),
        ("max-ins=50", "max-ins=5"), // below min-ins
        ("mem-per-frame=64", "mem-per-frame=32768"), // above max-overall-mem
        ("min-mem-per-proc=64", "min-mem-per-proc=96"), // not a power of two
        ("max-mem-per-proc=4096", "max-mem-per-proc=131072"), // above 65536
    ] {
        let text = VALID.replace(from, to);
        assert!(Config::parse(&text).is_err(), "`{to}` should be rejected");
    }
}

#[test]
fn rejects_lines_without_a_separator() {
    let text = format!("{VALID}garbage line\n");
    assert!(Config::parse(&text).is_err());
}
