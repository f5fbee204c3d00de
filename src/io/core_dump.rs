use std::fmt;

use crate::kernel::cpu::Registers;
use crate::kernel::{ProcessId, Word};

/// Number of stack words included in a dump.
pub const CORE_DUMP_STACK_WORDS: usize = 3;

/// Snapshot taken by the COREDUMP system call just before the process
/// exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreDump {
    pub pid: ProcessId,
    pub registers: Registers,
    /// Top of the stack first.
    pub stack: Vec<Word>,
}

impl fmt::Display for CoreDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CORE DUMP (process {})", self.pid)?;
        writeln!(f, "{}", self.registers)?;
        write!(f, "Top {} stack items:", CORE_DUMP_STACK_WORDS)?;
        for value in &self.stack {
            write!(f, " {}", value)?;
        }
        Ok(())
    }
}
