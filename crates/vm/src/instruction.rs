/// The closed instruction set executed by emulated processes. Each variant
/// carries its decoded operands; dispatch is by variant, never by string.
///
/// Address operands stay `i64` through parsing so an out-of-range or
/// negative literal survives until execution, where it terminates the
/// process as a memory violation rather than failing to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Emit a log line; with a variable, append its current value.
    Print {
        message: String,
        var: Option<String>,
    },
    /// Allocate a 2-byte symbol-table slot for `var` and store `value`.
    Declare { var: String, value: u16 },
    /// Two-operand add: var = (var + value) mod 2^16.
    Add { var: String, value: u16 },
    /// Three-operand add: dst = (lhs + rhs) mod 2^16; absent operands are
    /// auto-declared as 0.
    AddVars {
        dst: String,
        lhs: String,
        rhs: String,
    },
    /// Two-operand subtract: var = (var - value) mod 2^16.
    Subtract { var: String, value: u16 },
    /// Load the 16-bit word at byte `addr` into `var` (0 if uninitialized).
    Read { var: String, addr: i64 },
    /// Store the 16-bit value of `var` (0 if undeclared) at byte `addr`.
    Write { addr: i64, var: String },
    /// Execute `body` `count` times.
    ForLoop {
        count: u32,
        body: Vec<Instruction>,
    },
}

impl Instruction {
    /// Completed-task contribution of a successful execution: one for the
    /// instruction itself, plus every body instruction for a loop.
    pub fn task_count(&self) -> u64 {
        match self {
            Instruction::ForLoop { count, body } => {
                1 + u64::from(*count) * body.iter().map(Instruction::task_count).sum::<u64>()
            }
            _ => 1,
        }
    }

    /// Opcode name as it appears in log lines.
    pub fn opcode(&self) -> &'static str {
        match self {
            Instruction::Print { .. } => "PRINT",
            Instruction::Declare { .. } => "DECLARE",
            Instruction::Add { .. } | Instruction::AddVars { .. } => "ADD",
            Instruction::Subtract { .. } => "SUBTRACT",
            Instruction::Read { .. } => "READ",
            Instruction::Write { .. } => "WRITE",
            Instruction::ForLoop { .. } => "FOR_LOOP",
        }
    }
}
