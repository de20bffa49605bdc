//! Random process synthesis for `scheduler-start` runs with no processes.
//!
//! Driven by a seedable ChaCha8 engine so a fixed seed reproduces the same
//! workload instruction for instruction.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use vm::Instruction;

use crate::config::Config;

const VAR_POOL: [&str; 8] = ["a", "b", "c", "d", "e", "f", "g", "h"];

/// Random power-of-two address-space size within the configured range.
pub(crate) fn random_memory_size(config: &Config, rng: &mut ChaCha8Rng) -> usize {
    let lo = config.min_mem_per_proc.trailing_zeros();
    let hi = config.max_mem_per_proc.trailing_zeros();
    1usize << rng.gen_range(lo..=hi)
}

/// Random program of `min-ins..=max-ins` top-level instructions (capped at
/// the 50-instruction process limit). Loops never nest.
pub(crate) fn random_program(config: &Config, rng: &mut ChaCha8Rng, mem_size: usize) -> Vec<Instruction> {
    let count = rng
        .gen_range(config.min_ins..=config.max_ins)
        .clamp(1, 50) as usize;
    (0..count).map(|i| random_instruction(rng, mem_size, i)).collect()
}

fn random_instruction(rng: &mut ChaCha8Rng, mem_size: usize, index: usize) -> Instruction {
    match rng.gen_range(0..100u32) {
        0..=19 => {
            if rng.gen_bool(0.5) {
                Instruction::Print {
                    message: format!("step {index}: "),
                    var: Some(pick_var(rng)),
                }
            } else {
                Instruction::Print {
                    message: format!("hello from step {index}"),
                    var: None,
                }
            }
        }
        20..=39 => Instruction::Declare {
            var: pick_var(rng),
            value: rng.gen_range(0..=500),
        },
        40..=54 => Instruction::Add {
            var: pick_var(rng),
            value: rng.gen_range(1..=50),
        },
        55..=64 => Instruction::AddVars {
            dst: pick_var(rng),
            lhs: pick_var(rng),
            rhs: pick_var(rng),
        },
        65..=79 => Instruction::Subtract {
            var: pick_var(rng),
            value: rng.gen_range(1..=50),
        },
        80..=87 => Instruction::Read {
            var: pick_var(rng),
            addr: pick_addr(rng, mem_size),
        },
        88..=94 => Instruction::Write {
            addr: pick_addr(rng, mem_size),
            var: pick_var(rng),
        },
        _ => Instruction::ForLoop {
            count: rng.gen_range(2..=4),
            body: (0..rng.gen_range(1..=3usize))
                .map(|_| random_body_instruction(rng))
                .collect(),
        },
    }
}

/// Loop bodies stick to symbol-table arithmetic; in particular they never
/// contain another loop.
fn random_body_instruction(rng: &mut ChaCha8Rng) -> Instruction {
    match rng.gen_range(0..3u32) {
        0 => Instruction::Add {
            var: pick_var(rng),
            value: rng.gen_range(1..=10),
        },
        1 => Instruction::Subtract {
            var: pick_var(rng),
            value: rng.gen_range(1..=10),
        },
        _ => Instruction::Declare {
            var: pick_var(rng),
            value: rng.gen_range(0..=100),
        },
    }
}

fn pick_var(rng: &mut ChaCha8Rng) -> String {
    VAR_POOL[rng.gen_range(0..VAR_POOL.len())].to_string()
}

/// In-bounds, word-aligned byte address.
fn pick_addr(rng: &mut ChaCha8Rng, mem_size: usize) -> i64 {
    2 * rng.gen_range(0..mem_size as i64 / 2)
}
