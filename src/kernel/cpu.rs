use std::fmt;
use std::sync::Arc;

use super::instruction::{Instruction, Opcode};
use super::interrupt_controller::{InterruptController, InterruptKind};
use super::mmu::Access;
use super::{Memory, Mmu, Word};
use crate::io::DeviceId;

pub use super::instruction::INSTRUCTION_SIZE;

// Register file layout.
pub const R0: usize = 0;
pub const R1: usize = 1;
pub const R2: usize = 2;
pub const R3: usize = 3;
pub const R4: usize = 4;
pub const PC: usize = 5;
pub const SP: usize = 6;
pub const BASE: usize = 7;
pub const LIM: usize = 8;
pub const NUM_REGISTERS: usize = 9;
pub const NUM_GENERAL_REGISTERS: usize = PC;

/// Hardware faults. The CPU never recovers from these itself; each one is
/// handed to the trap handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Access outside `[BASE, LIM]`. `addr` is the BASE-relative address.
    IllegalMemoryAccess { addr: Word },
    /// Paged translation found no valid mapping for the linear address.
    PageFault { addr: Word },
    DivideByZero,
    IllegalInstruction { instruction: [Word; INSTRUCTION_SIZE] },
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::IllegalMemoryAccess { addr } => write!(f, "Illegal Memory Access Exception at {}", addr),
            Fault::PageFault { addr } => write!(f, "Page Fault at {}", addr),
            Fault::DivideByZero => write!(f, "Illegal Divide by Zero Exception"),
            Fault::IllegalInstruction { instruction } => {
                write!(f, "Illegal Instruction Exception {:?}", instruction)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// The process table emptied.
    Completed,
    Fault(Fault),
    /// Every process is blocked and there is no room for the idle process.
    OutOfMemory,
}

/// What the CPU should do after a step or a trap.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Halt(HaltReason),
}

/// Implemented by the operating system so the CPU can raise faults,
/// interrupts and system calls. Every call happens synchronously on the CPU
/// thread and may rewrite the CPU's registers (a context switch).
pub trait TrapHandler {
    fn fault(&mut self, cpu: &mut Cpu, fault: Fault) -> Flow;
    fn interrupt_clock(&mut self, cpu: &mut Cpu) -> Flow;
    /// Invoked by TRAP. The handler pops its own syscall number.
    fn system_call(&mut self, cpu: &mut Cpu) -> Flow;
    fn interrupt_io_read_complete(&mut self, cpu: &mut Cpu, device_id: DeviceId, addr: Word, data: Word) -> Flow;
    fn interrupt_io_write_complete(&mut self, cpu: &mut Cpu, device_id: DeviceId, addr: Word) -> Flow;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Registers([Word; NUM_REGISTERS]);

impl Registers {
    /// Registers for a fresh process owning `[base, lim]`.
    pub fn for_partition(base: Word, lim: Word) -> Registers {
        let mut registers = Registers::default();
        registers.0[PC] = base;
        registers.0[BASE] = base;
        registers.0[LIM] = lim;
        registers
    }

    pub fn get(&self, index: usize) -> Word {
        self.0[index]
    }

    pub fn set(&mut self, index: usize, value: Word) {
        self.0[index] = value;
    }

    pub fn pc(&self) -> Word {
        self.0[PC]
    }

    pub fn sp(&self) -> Word {
        self.0[SP]
    }

    pub fn base(&self) -> Word {
        self.0[BASE]
    }

    pub fn lim(&self) -> Word {
        self.0[LIM]
    }

    pub fn set_pc(&mut self, value: Word) {
        self.0[PC] = value;
    }

    pub fn set_sp(&mut self, value: Word) {
        self.0[SP] = value;
    }

    /// Moves the partition by `delta` words. SP counts down from LIM, so it
    /// moves with LIM.
    pub fn relocate(&mut self, delta: Word) {
        self.0[PC] += delta;
        self.0[BASE] += delta;
        self.0[LIM] += delta;
    }
}

impl fmt::Display for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..NUM_GENERAL_REGISTERS {
            write!(f, "r{}={} ", i, self.0[i])?;
        }
        write!(f, "PC={} SP={} BASE={} LIM={}", self.pc(), self.sp(), self.base(), self.lim())
    }
}

/// The simulated processor: register file, RAM, MMU and a tick counter.
///
/// `step` runs one fetch/decode/execute cycle. Interrupts are polled at the
/// top of each cycle and the clock interrupt fires every `clock_period`
/// ticks.
pub struct Cpu {
    registers: Registers,
    memory: Memory,
    mmu: Mmu,
    interrupts: Arc<InterruptController>,
    ticks: u64,
    clock_period: u64,
    next_clock: u64,
    verbose: bool,
}

impl Cpu {
    pub fn new(memory: Memory, mmu: Mmu, interrupts: Arc<InterruptController>, clock_period: u64) -> Cpu {
        let clock_period = clock_period.max(1);
        Cpu {
            registers: Registers::default(),
            memory,
            mmu,
            interrupts,
            ticks: 0,
            clock_period,
            next_clock: clock_period,
            verbose: false,
        }
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    pub fn set_registers(&mut self, registers: Registers) {
        self.registers = registers;
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn mmu(&self) -> &Mmu {
        &self.mmu
    }

    pub fn interrupts(&self) -> &Arc<InterruptController> {
        &self.interrupts
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Charges extra ticks, e.g. the cost of a context switch.
    pub fn add_ticks(&mut self, ticks: u64) {
        self.ticks += ticks;
    }

    /// Physical address of a BASE-relative offset in the running process.
    pub fn translate(&self, offset: Word) -> Result<usize, Fault> {
        let base = self.registers.base();
        let lim = self.registers.lim();
        self.mmu.translate(&self.memory, base, lim, offset)
    }

    /// Translates an offset the running program touches and marks its page
    /// as used.
    fn access(&mut self, offset: Word, access: Access) -> Result<usize, Fault> {
        let address = self.translate(offset)?;
        self.mmu.record_access(&mut self.memory, self.registers.base() + offset, access);
        Ok(address)
    }

    pub fn step(&mut self, trap_handler: &mut dyn TrapHandler) -> Flow {
        if let Flow::Halt(reason) = self.check_for_io_interrupt(trap_handler) {
            return Flow::Halt(reason);
        }

        let result = match self.fetch() {
            Ok(instruction) => {
                self.registers.set_pc(self.registers.pc() + INSTRUCTION_SIZE as Word);
                if self.verbose {
                    log::trace!("{} | {}", self.registers, instruction);
                }
                self.execute(instruction, trap_handler)
            }
            Err(fault) => Err(fault),
        };

        let flow = match result {
            Ok(flow) => flow,
            Err(fault) => trap_handler.fault(self, fault),
        };
        if let Flow::Halt(reason) = flow {
            return Flow::Halt(reason);
        }

        self.tick(trap_handler)
    }

    /// The next deadline is measured from when the clock handler returns,
    /// so the process it picks gets a full period after the switch cost.
    fn tick(&mut self, trap_handler: &mut dyn TrapHandler) -> Flow {
        self.ticks += 1;
        if self.ticks >= self.next_clock {
            let flow = trap_handler.interrupt_clock(self);
            self.next_clock = self.ticks + self.clock_period;
            return flow;
        }
        Flow::Continue
    }

    fn check_for_io_interrupt(&mut self, trap_handler: &mut dyn TrapHandler) -> Flow {
        let Some(event) = self.interrupts.try_take() else {
            return Flow::Continue;
        };

        if self.verbose {
            log::trace!(
                "CPU received interrupt: type={:?} dev={} addr={} data={}",
                event.kind,
                event.device_id,
                event.addr,
                event.data
            );
        }

        match event.kind {
            InterruptKind::ReadDone => {
                trap_handler.interrupt_io_read_complete(self, event.device_id, event.addr, event.data)
            }
            InterruptKind::WriteDone => trap_handler.interrupt_io_write_complete(self, event.device_id, event.addr),
        }
    }

    fn fetch(&mut self) -> Result<Instruction, Fault> {
        let offset = self.registers.pc() - self.registers.base();
        let mut words = [0; INSTRUCTION_SIZE];
        for (i, word) in words.iter_mut().enumerate() {
            let address = self.access(offset + i as Word, Access::Read)?;
            *word = self.memory.read_from(address);
        }

        Instruction::decode(words).map_err(|_| Fault::IllegalInstruction { instruction: words })
    }

    fn execute(&mut self, instruction: Instruction, trap_handler: &mut dyn TrapHandler) -> Result<Flow, Fault> {
        let Instruction { opcode, arg1, arg2, arg3 } = instruction;
        let illegal = Fault::IllegalInstruction { instruction: instruction.to_words() };

        match opcode {
            Opcode::Set => self.set_reg(arg1, arg2, illegal)?,
            Opcode::Add => {
                let value = self.get_reg(arg2, illegal)?.wrapping_add(self.get_reg(arg3, illegal)?);
                self.set_reg(arg1, value, illegal)?;
            }
            Opcode::Sub => {
                let value = self.get_reg(arg2, illegal)?.wrapping_sub(self.get_reg(arg3, illegal)?);
                self.set_reg(arg1, value, illegal)?;
            }
            Opcode::Mul => {
                let value = self.get_reg(arg2, illegal)?.wrapping_mul(self.get_reg(arg3, illegal)?);
                self.set_reg(arg1, value, illegal)?;
            }
            Opcode::Div => {
                let divisor = self.get_reg(arg3, illegal)?;
                if divisor == 0 {
                    return Err(Fault::DivideByZero);
                }
                let value = self.get_reg(arg2, illegal)?.wrapping_div(divisor);
                self.set_reg(arg1, value, illegal)?;
            }
            Opcode::Copy => {
                let value = self.get_reg(arg2, illegal)?;
                self.set_reg(arg1, value, illegal)?;
            }
            Opcode::Branch => self.branch(arg1)?,
            Opcode::Bne => {
                if self.get_reg(arg1, illegal)? != self.get_reg(arg2, illegal)? {
                    self.branch(arg3)?;
                }
            }
            Opcode::Blt => {
                if self.get_reg(arg1, illegal)? < self.get_reg(arg2, illegal)? {
                    self.branch(arg3)?;
                }
            }
            Opcode::Pop => {
                Self::general_register(arg1).ok_or(illegal)?;
                if let Some(value) = self.pop_from_stack()? {
                    self.set_reg(arg1, value, illegal)?;
                }
            }
            Opcode::Push => {
                let value = self.get_reg(arg1, illegal)?;
                self.push_to_stack(value)?;
            }
            Opcode::Load => {
                Self::general_register(arg1).ok_or(illegal)?;
                let address = self.access(self.get_reg(arg2, illegal)?, Access::Read)?;
                let value = self.memory.read_from(address);
                self.set_reg(arg1, value, illegal)?;
            }
            Opcode::Save => {
                let value = self.get_reg(arg1, illegal)?;
                let address = self.access(self.get_reg(arg2, illegal)?, Access::Write)?;
                self.memory.write_to(address, value);
            }
            Opcode::Trap => return Ok(trap_handler.system_call(self)),
        }

        Ok(Flow::Continue)
    }

    /// Jumps to a BASE-relative address. PC is left alone when the target
    /// lies outside the partition.
    fn branch(&mut self, offset: Word) -> Result<(), Fault> {
        self.translate(offset)?;
        self.registers.set_pc(self.registers.base() + offset);
        Ok(())
    }

    /// Pushes onto the stack at the top of the partition. The stack grows
    /// downward from LIM.
    pub fn push_to_stack(&mut self, value: Word) -> Result<(), Fault> {
        let Registers(regs) = self.registers;
        let address = self.access(regs[LIM] - regs[SP] - regs[BASE], Access::Write)?;
        self.memory.write_to(address, value);
        self.registers.set_sp(regs[SP] + 1);
        Ok(())
    }

    /// Pops from the stack; an empty stack yields `None` and leaves SP alone.
    pub fn pop_from_stack(&mut self) -> Result<Option<Word>, Fault> {
        let Registers(regs) = self.registers;
        if regs[SP] <= 0 {
            return Ok(None);
        }

        let sp = regs[SP] - 1;
        let address = self.access(regs[LIM] - sp - regs[BASE], Access::Read)?;
        self.registers.set_sp(sp);
        Ok(Some(self.memory.read_from(address)))
    }

    fn general_register(index: Word) -> Option<usize> {
        usize::try_from(index).ok().filter(|index| *index < NUM_GENERAL_REGISTERS)
    }

    /// Any register may be read.
    fn get_reg(&self, index: Word, illegal: Fault) -> Result<Word, Fault> {
        usize::try_from(index)
            .ok()
            .filter(|index| *index < NUM_REGISTERS)
            .map(|index| self.registers.get(index))
            .ok_or(illegal)
    }

    /// Only R0..R4 may be written by a program. Unlike the other registers,
    /// PC, SP, BASE and LIM are never loaded by SET, COPY, POP or LOAD: a
    /// write to them is an illegal instruction.
    fn set_reg(&mut self, index: Word, value: Word, illegal: Fault) -> Result<(), Fault> {
        let index = Self::general_register(index).ok_or(illegal)?;
        self.registers.set(index, value);
        Ok(())
    }
}
