use super::cpu::{Cpu, Registers};
use super::Word;
use crate::io::DeviceId;

pub type ProcessId = Word;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOperation {
    Open,
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    NotBlocked,
    BlockedOn {
        device_id: DeviceId,
        operation: IoOperation,
        addr: Word,
    },
}

/// Kernel bookkeeping for one process.
#[derive(Debug, Clone)]
pub struct ProcessControlBlock {
    id: ProcessId,
    /// Saved registers. `None` until the process is first switched out.
    registers: Option<Registers>,
    block_state: BlockState,

    last_ready_time: u64,
    num_ready: u64,
    avg_starve: f64,
    max_starve: u64,
}

impl ProcessControlBlock {
    pub fn new(id: ProcessId) -> ProcessControlBlock {
        ProcessControlBlock {
            id,
            registers: None,
            block_state: BlockState::NotBlocked,
            last_ready_time: 0,
            num_ready: 0,
            avg_starve: 0.0,
            max_starve: 0,
        }
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn registers(&self) -> Option<&Registers> {
        self.registers.as_ref()
    }

    pub fn registers_mut(&mut self) -> Option<&mut Registers> {
        self.registers.as_mut()
    }

    /// Copies the CPU registers into the PCB and charges the switch cost.
    pub fn save(&mut self, cpu: &mut Cpu, switch_ticks: u64) {
        self.registers = Some(*cpu.registers());
        cpu.add_ticks(switch_ticks);
    }

    /// Loads the saved registers into the CPU, charges the switch cost and
    /// records how long the process waited since it became ready.
    pub fn restore(&mut self, cpu: &mut Cpu, switch_ticks: u64) {
        if let Some(registers) = self.registers {
            cpu.set_registers(registers);
        }
        cpu.add_ticks(switch_ticks);
        self.record_starve(cpu.ticks());
    }

    /// Ready transition: the process starts waiting for the CPU at `now`.
    pub fn mark_ready(&mut self, now: u64) {
        self.last_ready_time = now;
        self.num_ready += 1;
    }

    fn record_starve(&mut self, now: u64) {
        if self.num_ready == 0 {
            return;
        }

        let starve = now.saturating_sub(self.last_ready_time);
        self.max_starve = self.max_starve.max(starve);
        let n = self.num_ready as f64;
        self.avg_starve = self.avg_starve * (n - 1.0) / n + starve as f64 / n;
    }

    pub fn block_state(&self) -> BlockState {
        self.block_state
    }

    pub fn block(&mut self, device_id: DeviceId, operation: IoOperation, addr: Word) {
        self.block_state = BlockState::BlockedOn { device_id, operation, addr };
    }

    pub fn unblock(&mut self) {
        self.block_state = BlockState::NotBlocked;
    }

    pub fn is_blocked(&self) -> bool {
        self.block_state != BlockState::NotBlocked
    }

    pub fn is_blocked_on(&self, device_id: DeviceId, operation: IoOperation) -> bool {
        matches!(
            self.block_state,
            BlockState::BlockedOn { device_id: d, operation: o, .. } if d == device_id && o == operation
        )
    }

    pub fn num_ready(&self) -> u64 {
        self.num_ready
    }

    pub fn avg_starve(&self) -> f64 {
        self.avg_starve
    }

    pub fn max_starve(&self) -> u64 {
        self.max_starve
    }

    pub fn stats(&self) -> ProcessStats {
        ProcessStats {
            id: self.id,
            num_ready: self.num_ready,
            avg_starve: self.avg_starve,
            max_starve: self.max_starve,
        }
    }
}

/// Scheduling statistics of a process, kept after it exits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessStats {
    pub id: ProcessId,
    pub num_ready: u64,
    pub avg_starve: f64,
    pub max_starve: u64,
}
