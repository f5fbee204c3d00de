use std::collections::{BTreeMap, BTreeSet};

use super::allocator::{Allocation, Allocator, MemBlock, Segment};
use super::cpu::{Cpu, Fault, Flow, HaltReason, Registers, TrapHandler};
use super::long_term_scheduler::LongTermScheduler;
use super::mmu::Access;
use super::process_control_block::{BlockState, IoOperation, ProcessControlBlock, ProcessId, ProcessStats};
use super::short_term_scheduler::ShortTermScheduler;
use super::syscall::SYSCALL_SUCCESS;
use super::Word;
use crate::config::{FaultPolicy, SimConfig};
use crate::error::{Result, SimError};
use crate::io::{CoreDump, Device, DeviceId, Program};

pub const FIRST_PROCESS_ID: ProcessId = 1001;

/// Extra words given to the idle process beyond its image, for its stack.
pub const IDLE_PROCESS_STACK: usize = 8;

/// A registered device and the processes that currently have it open.
pub struct DeviceInfo {
    pub(super) device: Box<dyn Device>,
    pub(super) procs: BTreeSet<ProcessId>,
}

impl DeviceInfo {
    pub fn device(&self) -> &dyn Device {
        &*self.device
    }

    pub fn holders(&self) -> &BTreeSet<ProcessId> {
        &self.procs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultRecord {
    pub pid: Option<ProcessId>,
    pub fault: Fault,
}

/// The operating system.
///
/// Runs on the CPU thread only: the CPU calls into it through
/// `TrapHandler` and it rewrites the CPU's registers on every context
/// switch. The process that is running has its registers in the CPU; every
/// other process has them saved in its PCB.
pub struct Kernel {
    pub(super) processes: BTreeMap<ProcessId, ProcessControlBlock>,
    pub(super) current: Option<ProcessId>,
    next_process_id: ProcessId,
    pub(super) devices: BTreeMap<DeviceId, DeviceInfo>,
    pub(super) programs: LongTermScheduler,
    allocator: Allocator,

    context_switch_ticks: u64,
    fault_policy: FaultPolicy,
    pub(super) default_alloc_size: usize,

    pub(super) outputs: Vec<Word>,
    pub(super) core_dumps: Vec<CoreDump>,
    faults: Vec<FaultRecord>,
    finished: Vec<ProcessStats>,
    idle_processes: BTreeSet<ProcessId>,
}

impl Kernel {
    pub fn new(config: &SimConfig, allocator: Allocator) -> Kernel {
        Kernel {
            processes: BTreeMap::new(),
            current: None,
            next_process_id: FIRST_PROCESS_ID,
            devices: BTreeMap::new(),
            programs: LongTermScheduler::new(),
            allocator,
            context_switch_ticks: config.context_switch_ticks,
            fault_policy: config.fault_policy,
            default_alloc_size: config.default_alloc_size,
            outputs: Vec::new(),
            core_dumps: Vec::new(),
            faults: Vec::new(),
            finished: Vec::new(),
            idle_processes: BTreeSet::new(),
        }
    }

    /// Adds a device and assigns it the next free id.
    pub fn register_device(&mut self, mut device: Box<dyn Device>) -> DeviceId {
        let id = self.devices.keys().next_back().map_or(0, |last| last + 1);
        device.set_id(id);
        log::info!("Registered device {}", id);
        self.devices.insert(id, DeviceInfo { device, procs: BTreeSet::new() });
        id
    }

    /// Makes a program available to EXEC.
    pub fn add_program(&mut self, program: Program) {
        self.programs.add_program(program);
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    pub fn current_process(&self) -> Option<ProcessId> {
        self.current
    }

    pub fn process(&self, pid: ProcessId) -> Option<&ProcessControlBlock> {
        self.processes.get(&pid)
    }

    pub fn device(&self, device_id: DeviceId) -> Option<&DeviceInfo> {
        self.devices.get(&device_id)
    }

    pub fn programs(&self) -> &LongTermScheduler {
        &self.programs
    }

    /// Values emitted by the OUTPUT system call, in order.
    pub fn outputs(&self) -> &[Word] {
        &self.outputs
    }

    pub fn core_dumps(&self) -> &[CoreDump] {
        &self.core_dumps
    }

    pub fn faults(&self) -> &[FaultRecord] {
        &self.faults
    }

    /// Statistics of every user process that has left the process table.
    /// Idle processes are not reported.
    pub fn finished(&self) -> &[ProcessStats] {
        &self.finished
    }

    pub fn free_blocks(&self, cpu: &Cpu) -> Vec<MemBlock> {
        self.allocator.free_blocks(&self.segments(cpu))
    }

    /// Memory owned by every live process.
    pub fn segments(&self, cpu: &Cpu) -> Vec<Segment> {
        self.processes
            .iter()
            .filter_map(|(pid, pcb)| {
                let registers = self.registers_of(cpu, *pid, pcb)?;
                Some(Segment {
                    pid: *pid,
                    base: registers.base() as usize,
                    size: (registers.lim() - registers.base() + 1) as usize,
                })
            })
            .collect()
    }

    fn registers_of<'a>(&self, cpu: &'a Cpu, pid: ProcessId, pcb: &'a ProcessControlBlock) -> Option<&'a Registers> {
        if self.current == Some(pid) {
            Some(cpu.registers())
        } else {
            pcb.registers()
        }
    }

    /// Loads `program` into a fresh partition of `alloc_size` words and
    /// switches the CPU to it.
    pub fn create_process(&mut self, cpu: &mut Cpu, program: &Program, alloc_size: usize) -> Result<ProcessId> {
        let image = program.export();
        if image.len() > alloc_size {
            return Err(SimError::ProgramTooLarge {
                program_size: image.len(),
                alloc_size,
            });
        }

        let base = self.allocate(cpu, alloc_size)?;
        cpu.memory_mut().write_block_to(base, &image);

        self.switch_out(cpu);

        let pid = self.next_process_id;
        self.next_process_id += 1;
        self.processes.insert(pid, ProcessControlBlock::new(pid));
        self.current = Some(pid);

        let base = base as Word;
        cpu.set_registers(Registers::for_partition(base, base + alloc_size as Word - 1));

        log::info!(
            "Installed program '{}' as process {} at [{}, {}]",
            program.name,
            pid,
            base,
            base + alloc_size as Word - 1
        );
        Ok(pid)
    }

    /// First-fit allocation, compacting once when memory is fragmented.
    fn allocate(&mut self, cpu: &mut Cpu, size: usize) -> Result<usize> {
        match self.allocator.allocate(size, &self.segments(cpu)) {
            Allocation::Placed { address } => return Ok(address),
            Allocation::Full { free } => return Err(SimError::OutOfMemory { requested: size, free }),
            Allocation::NeedsCompaction => self.compact(cpu),
        }

        let segments = self.segments(cpu);
        match self.allocator.allocate(size, &segments) {
            Allocation::Placed { address } => Ok(address),
            _ => Err(SimError::OutOfMemory {
                requested: size,
                free: self.allocator.free_words(&segments),
            }),
        }
    }

    /// Slides every live process down to remove the holes between them.
    pub fn compact(&mut self, cpu: &mut Cpu) {
        let plan = self.allocator.compaction_plan(&self.segments(cpu));
        log::debug!("Compacting memory: {} processes move", plan.len());

        for step in plan {
            cpu.memory_mut().copy_within(step.from, step.to, step.len);
            let delta = step.delta() as Word;

            if self.current == Some(step.pid) {
                let mut registers = *cpu.registers();
                registers.relocate(delta);
                cpu.set_registers(registers);
            } else if let Some(registers) = self.processes.get_mut(&step.pid).and_then(|pcb| pcb.registers_mut()) {
                registers.relocate(delta);
            }
        }
    }

    /// Saves the running process, if any. A process that is not blocked
    /// becomes ready.
    fn switch_out(&mut self, cpu: &mut Cpu) {
        let Some(pid) = self.current.take() else {
            return;
        };
        if let Some(pcb) = self.processes.get_mut(&pid) {
            pcb.save(cpu, self.context_switch_ticks);
            if !pcb.is_blocked() {
                pcb.mark_ready(cpu.ticks());
            }
        }
    }

    fn switch_to(&mut self, cpu: &mut Cpu, pid: ProcessId) {
        if let Some(pcb) = self.processes.get_mut(&pid) {
            pcb.restore(cpu, self.context_switch_ticks);
            self.current = Some(pid);
        }
    }

    /// Picks the next process to run. Halts once the process table is
    /// empty; runs the idle process when everyone is blocked.
    ///
    /// The running process is always saved and the chosen one restored,
    /// even when they are the same, so both pay the switch cost and the
    /// chosen process's starve average is updated.
    pub fn schedule_new_process(&mut self, cpu: &mut Cpu) -> Flow {
        if self.processes.is_empty() {
            log::info!("No more processes to run. Stopping.");
            return Flow::Halt(HaltReason::Completed);
        }

        let previous = self.current;
        self.switch_out(cpu);

        let Some(pid) = ShortTermScheduler::select(self.processes.values(), previous) else {
            return self.create_idle_process(cpu);
        };
        self.switch_to(cpu, pid);
        if previous != Some(pid) {
            log::debug!("Switched to process {}", pid);
        }
        Flow::Continue
    }

    fn create_idle_process(&mut self, cpu: &mut Cpu) -> Flow {
        let mut idle = Program::new("idle", Vec::new());
        idle.ensure_exit();
        let alloc_size = idle.export().len() + IDLE_PROCESS_STACK;

        match self.create_process(cpu, &idle, alloc_size) {
            Ok(pid) => {
                self.idle_processes.insert(pid);
                log::trace!("Running idle process {}", pid);
                Flow::Continue
            }
            Err(err) => {
                log::error!("Cannot create the idle process: {}", err);
                Flow::Halt(HaltReason::OutOfMemory)
            }
        }
    }

    /// Removes the running process, releasing its memory and devices.
    pub fn remove_current_process(&mut self, cpu: &mut Cpu) {
        let Some(pid) = self.current.take() else {
            return;
        };
        if let Some(pcb) = self.processes.remove(&pid) {
            if !self.idle_processes.remove(&pid) {
                self.finished.push(pcb.stats());
            }
        }

        let held: Vec<DeviceId> = self
            .devices
            .iter_mut()
            .filter_map(|(device_id, info)| info.procs.remove(&pid).then_some(*device_id))
            .collect();
        for device_id in held {
            self.grant_device_to_waiter(cpu, device_id);
        }

        log::info!("Removed process {}", pid);
    }

    /// Hands a device that just became free to the first process blocked
    /// opening it.
    pub(super) fn grant_device_to_waiter(&mut self, cpu: &mut Cpu, device_id: DeviceId) {
        let Some(info) = self.devices.get(&device_id) else {
            return;
        };
        if info.device.is_sharable() || !info.procs.is_empty() {
            return;
        }
        let Some(pid) = self.select_blocked_process(device_id, IoOperation::Open, None) else {
            return;
        };

        if let Some(info) = self.devices.get_mut(&device_id) {
            info.procs.insert(pid);
        }
        self.wake(cpu, pid, &[SYSCALL_SUCCESS]);
        log::debug!("Process {} now holds device {}", pid, device_id);
    }

    /// First process (by id) blocked on `operation` at `device_id`,
    /// optionally at a specific address.
    pub fn select_blocked_process(
        &self,
        device_id: DeviceId,
        operation: IoOperation,
        addr: Option<Word>,
    ) -> Option<ProcessId> {
        self.processes
            .values()
            .find(|pcb| match pcb.block_state() {
                BlockState::BlockedOn {
                    device_id: blocked_device,
                    operation: blocked_operation,
                    addr: blocked_addr,
                } => {
                    blocked_device == device_id
                        && blocked_operation == operation
                        && addr.map_or(true, |addr| addr == blocked_addr)
                }
                BlockState::NotBlocked => false,
            })
            .map(|pcb| pcb.id())
    }

    /// Unblocks a process and pushes syscall results onto its stack.
    fn wake(&mut self, cpu: &mut Cpu, pid: ProcessId, results: &[Word]) {
        let now = cpu.ticks();
        if let Some(pcb) = self.processes.get_mut(&pid) {
            pcb.unblock();
            pcb.mark_ready(now);
        }
        for value in results {
            self.push_to_process_stack(cpu, pid, *value);
        }
    }

    /// Pushes onto the stack of any process. A switched-out process is
    /// reached through its saved SP and LIM.
    pub fn push_to_process_stack(&mut self, cpu: &mut Cpu, pid: ProcessId, value: Word) {
        if self.current == Some(pid) {
            if let Err(fault) = cpu.push_to_stack(value) {
                log::error!("Process {} stack push failed: {}", pid, fault);
            }
            return;
        }

        let Some(registers) = self.processes.get_mut(&pid).and_then(|pcb| pcb.registers_mut()) else {
            return;
        };
        let offset = registers.lim() - registers.sp() - registers.base();
        let mmu = *cpu.mmu();
        match mmu.translate(cpu.memory(), registers.base(), registers.lim(), offset) {
            Ok(address) => {
                mmu.record_access(cpu.memory_mut(), registers.base() + offset, Access::Write);
                cpu.memory_mut().write_to(address, value);
                registers.set_sp(registers.sp() + 1);
            }
            Err(fault) => log::error!("Process {} stack push failed: {}", pid, fault),
        }
    }

    fn io_complete(&mut self, cpu: &mut Cpu, device_id: DeviceId, operation: IoOperation, addr: Word, results: &[Word]) {
        if !self.devices.contains_key(&device_id) {
            log::warn!("Interrupt from unknown device {}", device_id);
            return;
        }

        match self.select_blocked_process(device_id, operation, Some(addr)) {
            Some(pid) => self.wake(cpu, pid, results),
            None => log::warn!(
                "No process waiting on {:?} from device {} at {}",
                operation,
                device_id,
                addr
            ),
        }
    }
}

impl TrapHandler for Kernel {
    fn fault(&mut self, cpu: &mut Cpu, fault: Fault) -> Flow {
        let pid = self.current;
        log::error!("Process {:?}: {}", pid, fault);
        self.faults.push(FaultRecord { pid, fault });

        match self.fault_policy {
            FaultPolicy::Halt => Flow::Halt(HaltReason::Fault(fault)),
            FaultPolicy::TerminateProcess => {
                self.remove_current_process(cpu);
                self.schedule_new_process(cpu)
            }
        }
    }

    fn interrupt_clock(&mut self, cpu: &mut Cpu) -> Flow {
        self.schedule_new_process(cpu)
    }

    fn system_call(&mut self, cpu: &mut Cpu) -> Flow {
        match self.dispatch_system_call(cpu) {
            Ok(flow) => flow,
            Err(fault) => self.fault(cpu, fault),
        }
    }

    fn interrupt_io_read_complete(&mut self, cpu: &mut Cpu, device_id: DeviceId, addr: Word, data: Word) -> Flow {
        self.io_complete(cpu, device_id, IoOperation::Read, addr, &[data, SYSCALL_SUCCESS]);
        Flow::Continue
    }

    fn interrupt_io_write_complete(&mut self, cpu: &mut Cpu, device_id: DeviceId, addr: Word) -> Flow {
        self.io_complete(cpu, device_id, IoOperation::Write, addr, &[SYSCALL_SUCCESS]);
        Flow::Continue
    }
}
