pub mod allocator;
pub mod cpu;
pub mod driver;
pub mod instruction;
pub mod interrupt_controller;
pub mod long_term_scheduler;
pub mod memory;
pub mod mmu;
pub mod os;
pub mod process_control_block;
pub mod short_term_scheduler;
pub mod syscall;

/// The machine word: registers, memory cells and instruction fields.
pub type Word = i32;

pub use allocator::{Allocator, MemBlock};
pub use cpu::{Cpu, Fault, Flow, HaltReason, Registers, TrapHandler};
pub use driver::{Driver, RunSummary};
pub use instruction::{Instruction, Opcode};
pub use interrupt_controller::{InterruptController, InterruptEvent, InterruptKind};
pub use long_term_scheduler::LongTermScheduler;
pub use memory::Memory;
pub use mmu::Mmu;
pub use os::Kernel;
pub use process_control_block::{BlockState, IoOperation, ProcessControlBlock, ProcessId, ProcessStats};
pub use short_term_scheduler::ShortTermScheduler;
