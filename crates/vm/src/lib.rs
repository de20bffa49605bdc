pub mod exec_log;
pub mod instruction;
pub mod interpreter;
pub mod parser;
pub mod process;

pub use exec_log::ProcessLog;
pub use instruction::Instruction;
pub use interpreter::{execute_step, ExecContext, StepResult};
pub use parser::{parse_program, ParseError};
pub use process::{Pid, Process, ProcessHandle, ProcessStatus};
