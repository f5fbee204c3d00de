use super::cpu::{Cpu, Fault, Flow, INSTRUCTION_SIZE};
use super::os::Kernel;
use super::process_control_block::IoOperation;
use super::Word;
use crate::io::core_dump::CORE_DUMP_STACK_WORDS;
use crate::io::{CoreDump, DeviceId};

// System call numbers. Arguments are pushed before the number.
pub const SYSCALL_EXIT: Word = 0;
pub const SYSCALL_OUTPUT: Word = 1;
pub const SYSCALL_GETPID: Word = 2;
pub const SYSCALL_OPEN: Word = 3;
pub const SYSCALL_CLOSE: Word = 4;
pub const SYSCALL_READ: Word = 5;
pub const SYSCALL_WRITE: Word = 6;
pub const SYSCALL_EXEC: Word = 7;
pub const SYSCALL_YIELD: Word = 8;
pub const SYSCALL_COREDUMP: Word = 9;

// Result codes pushed back to the caller.
pub const SYSCALL_SUCCESS: Word = 0;
pub const DEVICE_NOT_FOUND: Word = -1;
pub const DEVICE_NOT_SHARABLE: Word = -2;
pub const DEVICE_ALREADY_OPEN: Word = -3;
pub const DEVICE_NOT_OPEN: Word = -4;
pub const DEVICE_READ_ONLY: Word = -5;
pub const DEVICE_WRITE_ONLY: Word = -6;

impl Kernel {
    /// Runs the system call whose number is on top of the running process's
    /// stack. A stack access outside the partition is returned as a fault.
    pub(super) fn dispatch_system_call(&mut self, cpu: &mut Cpu) -> Result<Flow, Fault> {
        let number = pop_arg(cpu)?;

        match number {
            SYSCALL_EXIT => Ok(self.syscall_exit(cpu)),
            SYSCALL_OUTPUT => self.syscall_output(cpu),
            SYSCALL_GETPID => self.syscall_getpid(cpu),
            SYSCALL_OPEN => self.syscall_open(cpu),
            SYSCALL_CLOSE => self.syscall_close(cpu),
            SYSCALL_READ => self.syscall_read(cpu),
            SYSCALL_WRITE => self.syscall_write(cpu),
            SYSCALL_EXEC => Ok(self.syscall_exec(cpu)),
            SYSCALL_YIELD => Ok(self.schedule_new_process(cpu)),
            SYSCALL_COREDUMP => self.syscall_coredump(cpu),
            _ => {
                log::warn!("Process {:?} made unknown system call {}", self.current, number);
                Ok(Flow::Continue)
            }
        }
    }

    fn syscall_exit(&mut self, cpu: &mut Cpu) -> Flow {
        self.remove_current_process(cpu);
        self.schedule_new_process(cpu)
    }

    fn syscall_output(&mut self, cpu: &mut Cpu) -> Result<Flow, Fault> {
        let value = pop_arg(cpu)?;
        println!("OUTPUT: {}", value);
        self.outputs.push(value);
        Ok(Flow::Continue)
    }

    fn syscall_getpid(&mut self, cpu: &mut Cpu) -> Result<Flow, Fault> {
        let pid = self.current.unwrap_or(-1);
        cpu.push_to_stack(pid)?;
        Ok(Flow::Continue)
    }

    fn syscall_open(&mut self, cpu: &mut Cpu) -> Result<Flow, Fault> {
        let device_id = pop_arg(cpu)?;
        let Some(pid) = self.current else {
            return Ok(Flow::Continue);
        };
        let Some(info) = self.devices.get_mut(&device_id) else {
            cpu.push_to_stack(DEVICE_NOT_FOUND)?;
            return Ok(Flow::Continue);
        };

        if info.procs.contains(&pid) {
            cpu.push_to_stack(DEVICE_ALREADY_OPEN)?;
            return Ok(Flow::Continue);
        }

        if !info.device.is_sharable() && !info.procs.is_empty() {
            log::debug!("Process {} waits to open device {}", pid, device_id);
            self.block_current(device_id, IoOperation::Open, 0);
            return Ok(self.schedule_new_process(cpu));
        }

        info.procs.insert(pid);
        cpu.push_to_stack(SYSCALL_SUCCESS)?;
        Ok(Flow::Continue)
    }

    fn syscall_close(&mut self, cpu: &mut Cpu) -> Result<Flow, Fault> {
        let device_id = pop_arg(cpu)?;
        let Some(pid) = self.current else {
            return Ok(Flow::Continue);
        };
        let Some(info) = self.devices.get_mut(&device_id) else {
            cpu.push_to_stack(DEVICE_NOT_FOUND)?;
            return Ok(Flow::Continue);
        };

        if !info.procs.remove(&pid) {
            cpu.push_to_stack(DEVICE_NOT_OPEN)?;
            return Ok(Flow::Continue);
        }

        cpu.push_to_stack(SYSCALL_SUCCESS)?;
        self.grant_device_to_waiter(cpu, device_id);
        Ok(Flow::Continue)
    }

    fn syscall_read(&mut self, cpu: &mut Cpu) -> Result<Flow, Fault> {
        let addr = pop_arg(cpu)?;
        let device_id = pop_arg(cpu)?;

        if let Some(code) = self.check_device_access(device_id, IoOperation::Read) {
            cpu.push_to_stack(code)?;
            return Ok(Flow::Continue);
        }
        if !self.device_available(device_id) {
            return self.retry_syscall(cpu, &[device_id, addr, SYSCALL_READ]);
        }

        if let Some(info) = self.devices.get_mut(&device_id) {
            info.device.read(addr);
        }
        self.block_current(device_id, IoOperation::Read, addr);
        Ok(self.schedule_new_process(cpu))
    }

    fn syscall_write(&mut self, cpu: &mut Cpu) -> Result<Flow, Fault> {
        let value = pop_arg(cpu)?;
        let addr = pop_arg(cpu)?;
        let device_id = pop_arg(cpu)?;

        if let Some(code) = self.check_device_access(device_id, IoOperation::Write) {
            cpu.push_to_stack(code)?;
            return Ok(Flow::Continue);
        }
        if !self.device_available(device_id) {
            return self.retry_syscall(cpu, &[device_id, addr, value, SYSCALL_WRITE]);
        }

        if let Some(info) = self.devices.get_mut(&device_id) {
            info.device.write(addr, value);
        }
        self.block_current(device_id, IoOperation::Write, addr);
        Ok(self.schedule_new_process(cpu))
    }

    fn syscall_exec(&mut self, cpu: &mut Cpu) -> Flow {
        let Some(program) = self.programs.select_for_exec() else {
            log::warn!("EXEC with no registered programs");
            return Flow::Continue;
        };

        let alloc_size = program.default_alloc_size.unwrap_or(self.default_alloc_size);
        if let Err(err) = self.create_process(cpu, &program, alloc_size) {
            log::error!("EXEC of '{}' failed: {}", program.name, err);
        }
        Flow::Continue
    }

    fn syscall_coredump(&mut self, cpu: &mut Cpu) -> Result<Flow, Fault> {
        let registers = *cpu.registers();
        let mut stack = Vec::with_capacity(CORE_DUMP_STACK_WORDS);
        for _ in 0..CORE_DUMP_STACK_WORDS {
            match cpu.pop_from_stack()? {
                Some(value) => stack.push(value),
                None => break,
            }
        }

        let dump = CoreDump {
            pid: self.current.unwrap_or(-1),
            registers,
            stack,
        };
        println!("{}", dump);
        self.core_dumps.push(dump);
        Ok(self.syscall_exit(cpu))
    }

    /// Result code for a READ or WRITE the running process may not make.
    fn check_device_access(&self, device_id: DeviceId, operation: IoOperation) -> Option<Word> {
        let Some(info) = self.devices.get(&device_id) else {
            return Some(DEVICE_NOT_FOUND);
        };
        let is_open = self.current.map_or(false, |pid| info.procs.contains(&pid));
        if !is_open {
            return Some(DEVICE_NOT_OPEN);
        }

        match operation {
            IoOperation::Read if !info.device.is_readable() => Some(DEVICE_WRITE_ONLY),
            IoOperation::Write if !info.device.is_writeable() => Some(DEVICE_READ_ONLY),
            _ => None,
        }
    }

    fn device_available(&self, device_id: DeviceId) -> bool {
        self.devices
            .get(&device_id)
            .map_or(false, |info| info.device.is_available())
    }

    /// Puts the arguments and the syscall number back and rewinds PC onto
    /// the TRAP so the same call runs again once the process is rescheduled.
    fn retry_syscall(&mut self, cpu: &mut Cpu, stack: &[Word]) -> Result<Flow, Fault> {
        for value in stack {
            cpu.push_to_stack(*value)?;
        }
        let pc = cpu.registers().pc();
        cpu.registers_mut().set_pc(pc - INSTRUCTION_SIZE as Word);
        Ok(self.schedule_new_process(cpu))
    }

    fn block_current(&mut self, device_id: DeviceId, operation: IoOperation, addr: Word) {
        if let Some(pcb) = self.current.and_then(|pid| self.processes.get_mut(&pid)) {
            pcb.block(device_id, operation, addr);
        }
    }
}

/// An empty stack reads as zero.
fn pop_arg(cpu: &mut Cpu) -> Result<Word, Fault> {
    Ok(cpu.pop_from_stack()?.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::SimConfig;
    use crate::io::{Device, Program};
    use crate::kernel::allocator::Allocator;
    use crate::kernel::instruction::Instruction;
    use crate::kernel::cpu::TrapHandler;
    use crate::kernel::{InterruptController, Memory, Mmu, ProcessId};

    /// Device that never completes on its own; tests drive it by hand.
    struct ManualDevice {
        id: DeviceId,
        sharable: bool,
        readable: bool,
        writeable: bool,
        busy: bool,
    }

    impl ManualDevice {
        fn new(sharable: bool, readable: bool, writeable: bool) -> ManualDevice {
            ManualDevice { id: -1, sharable, readable, writeable, busy: false }
        }
    }

    impl Device for ManualDevice {
        fn id(&self) -> DeviceId {
            self.id
        }
        fn set_id(&mut self, id: DeviceId) {
            self.id = id;
        }
        fn is_sharable(&self) -> bool {
            self.sharable
        }
        fn is_available(&self) -> bool {
            !self.busy
        }
        fn is_readable(&self) -> bool {
            self.readable
        }
        fn is_writeable(&self) -> bool {
            self.writeable
        }
        fn read(&mut self, _addr: Word) {
            self.busy = true;
        }
        fn write(&mut self, _addr: Word, _data: Word) {
            self.busy = true;
        }
    }

    fn machine() -> (Cpu, Kernel) {
        let cpu = Cpu::new(Memory::new(1000), Mmu::segmented(), Arc::new(InterruptController::new()), 1000);
        let kernel = Kernel::new(&SimConfig::default(), Allocator::new(0, 1000));
        (cpu, kernel)
    }

    fn spawn(cpu: &mut Cpu, kernel: &mut Kernel) -> ProcessId {
        let program = Program::new("p", vec![Instruction::set(0, 0)]);
        kernel.create_process(cpu, &program, 100).unwrap()
    }

    /// Pushes `args` and runs the system call as the CPU would after TRAP.
    fn syscall(cpu: &mut Cpu, kernel: &mut Kernel, args: &[Word]) -> Flow {
        for arg in args {
            cpu.push_to_stack(*arg).unwrap();
        }
        kernel.system_call(cpu)
    }

    #[test]
    fn test_syscall_output_and_getpid() {
        let (mut cpu, mut kernel) = machine();
        let pid = spawn(&mut cpu, &mut kernel);

        assert_eq!(syscall(&mut cpu, &mut kernel, &[42, SYSCALL_OUTPUT]), Flow::Continue);
        assert_eq!(kernel.outputs(), &[42]);

        assert_eq!(syscall(&mut cpu, &mut kernel, &[SYSCALL_GETPID]), Flow::Continue);
        assert_eq!(cpu.pop_from_stack(), Ok(Some(pid)));
    }

    #[test]
    fn test_syscall_open_close_result_codes() {
        let (mut cpu, mut kernel) = machine();
        let device_id = kernel.register_device(Box::new(ManualDevice::new(true, true, true)));
        spawn(&mut cpu, &mut kernel);

        let _ = syscall(&mut cpu, &mut kernel, &[device_id + 5, SYSCALL_OPEN]);
        assert_eq!(cpu.pop_from_stack(), Ok(Some(DEVICE_NOT_FOUND)));

        let _ = syscall(&mut cpu, &mut kernel, &[device_id, SYSCALL_CLOSE]);
        assert_eq!(cpu.pop_from_stack(), Ok(Some(DEVICE_NOT_OPEN)));

        let _ = syscall(&mut cpu, &mut kernel, &[device_id, SYSCALL_OPEN]);
        assert_eq!(cpu.pop_from_stack(), Ok(Some(SYSCALL_SUCCESS)));

        let _ = syscall(&mut cpu, &mut kernel, &[device_id, SYSCALL_OPEN]);
        assert_eq!(cpu.pop_from_stack(), Ok(Some(DEVICE_ALREADY_OPEN)));

        let _ = syscall(&mut cpu, &mut kernel, &[device_id, SYSCALL_CLOSE]);
        assert_eq!(cpu.pop_from_stack(), Ok(Some(SYSCALL_SUCCESS)));
        assert!(kernel.device(device_id).unwrap().holders().is_empty());
    }

    #[test]
    fn test_syscall_read_write_capability_codes() {
        let (mut cpu, mut kernel) = machine();
        let read_only = kernel.register_device(Box::new(ManualDevice::new(true, true, false)));
        let write_only = kernel.register_device(Box::new(ManualDevice::new(true, false, true)));
        spawn(&mut cpu, &mut kernel);

        let _ = syscall(&mut cpu, &mut kernel, &[read_only, 0, SYSCALL_READ]);
        assert_eq!(cpu.pop_from_stack(), Ok(Some(DEVICE_NOT_OPEN)));

        let _ = syscall(&mut cpu, &mut kernel, &[read_only, SYSCALL_OPEN]);
        let _ = syscall(&mut cpu, &mut kernel, &[write_only, SYSCALL_OPEN]);
        assert_eq!(cpu.pop_from_stack(), Ok(Some(SYSCALL_SUCCESS)));
        assert_eq!(cpu.pop_from_stack(), Ok(Some(SYSCALL_SUCCESS)));

        let _ = syscall(&mut cpu, &mut kernel, &[read_only, 0, 9, SYSCALL_WRITE]);
        assert_eq!(cpu.pop_from_stack(), Ok(Some(DEVICE_READ_ONLY)));

        let _ = syscall(&mut cpu, &mut kernel, &[write_only, 0, SYSCALL_READ]);
        assert_eq!(cpu.pop_from_stack(), Ok(Some(DEVICE_WRITE_ONLY)));
    }

    #[test]
    fn test_syscall_read_blocks_then_interrupt_delivers_result() {
        let (mut cpu, mut kernel) = machine();
        let device_id = kernel.register_device(Box::new(ManualDevice::new(true, true, false)));
        let other = spawn(&mut cpu, &mut kernel);
        let reader = spawn(&mut cpu, &mut kernel);
        let _ = syscall(&mut cpu, &mut kernel, &[device_id, SYSCALL_OPEN]);
        let _ = cpu.pop_from_stack();

        assert_eq!(syscall(&mut cpu, &mut kernel, &[device_id, 12, SYSCALL_READ]), Flow::Continue);
        assert!(kernel.process(reader).unwrap().is_blocked_on(device_id, IoOperation::Read));
        assert_eq!(kernel.current_process(), Some(other));

        let _ = kernel.interrupt_io_read_complete(&mut cpu, device_id, 12, 777);
        let reader_pcb = kernel.process(reader).unwrap();
        assert!(!reader_pcb.is_blocked());

        // data first, then the result code on top
        let registers = reader_pcb.registers().unwrap();
        assert_eq!(registers.sp(), 2);
        let top = (registers.lim() - 1) as usize;
        assert_eq!(cpu.memory().read_from(top), SYSCALL_SUCCESS);
        assert_eq!(cpu.memory().read_from(top + 1), 777);
    }

    #[test]
    fn test_syscall_read_busy_device_rewinds_and_repushes() {
        let (mut cpu, mut kernel) = machine();
        let mut device = ManualDevice::new(true, true, false);
        device.busy = true;
        let device_id = kernel.register_device(Box::new(device));
        spawn(&mut cpu, &mut kernel);
        let _ = syscall(&mut cpu, &mut kernel, &[device_id, SYSCALL_OPEN]);
        let _ = cpu.pop_from_stack();
        let base = cpu.registers().base();
        cpu.registers_mut().set_pc(base + 12);

        let _ = syscall(&mut cpu, &mut kernel, &[device_id, 30, SYSCALL_READ]);

        assert_eq!(cpu.registers().pc(), cpu.registers().base() + 8);
        assert_eq!(cpu.pop_from_stack(), Ok(Some(SYSCALL_READ)));
        assert_eq!(cpu.pop_from_stack(), Ok(Some(30)));
        assert_eq!(cpu.pop_from_stack(), Ok(Some(device_id)));
        assert!(!kernel.process(kernel.current_process().unwrap()).unwrap().is_blocked());
    }

    #[test]
    fn test_syscall_open_non_sharable_blocks_until_close() {
        let (mut cpu, mut kernel) = machine();
        let device_id = kernel.register_device(Box::new(ManualDevice::new(false, true, false)));
        let holder = spawn(&mut cpu, &mut kernel);
        let _ = syscall(&mut cpu, &mut kernel, &[device_id, SYSCALL_OPEN]);
        let _ = cpu.pop_from_stack();

        let waiter = spawn(&mut cpu, &mut kernel);
        let _ = syscall(&mut cpu, &mut kernel, &[device_id, SYSCALL_OPEN]);
        assert!(kernel.process(waiter).unwrap().is_blocked_on(device_id, IoOperation::Open));
        assert_eq!(kernel.current_process(), Some(holder));

        let _ = syscall(&mut cpu, &mut kernel, &[device_id, SYSCALL_CLOSE]);
        assert_eq!(cpu.pop_from_stack(), Ok(Some(SYSCALL_SUCCESS)));

        let waiter_pcb = kernel.process(waiter).unwrap();
        assert!(!waiter_pcb.is_blocked());
        assert_eq!(waiter_pcb.registers().unwrap().sp(), 1);
        assert!(kernel.device(device_id).unwrap().holders().contains(&waiter));
    }

    #[test]
    fn test_syscall_exit_releases_device_to_waiter() {
        let (mut cpu, mut kernel) = machine();
        let device_id = kernel.register_device(Box::new(ManualDevice::new(false, true, false)));
        let holder = spawn(&mut cpu, &mut kernel);
        let _ = syscall(&mut cpu, &mut kernel, &[device_id, SYSCALL_OPEN]);
        let _ = cpu.pop_from_stack();
        let waiter = spawn(&mut cpu, &mut kernel);
        let _ = syscall(&mut cpu, &mut kernel, &[device_id, SYSCALL_OPEN]);
        assert_eq!(kernel.current_process(), Some(holder));

        assert_eq!(syscall(&mut cpu, &mut kernel, &[SYSCALL_EXIT]), Flow::Continue);

        assert_eq!(kernel.current_process(), Some(waiter));
        assert!(kernel.device(device_id).unwrap().holders().contains(&waiter));
        assert_eq!(cpu.pop_from_stack(), Ok(Some(SYSCALL_SUCCESS)));
    }

    #[test]
    fn test_syscall_exec_installs_registered_program() {
        let (mut cpu, mut kernel) = machine();
        kernel.add_program(Program::new("child", vec![Instruction::set(1, 1)]).with_default_alloc_size(60));
        let parent = spawn(&mut cpu, &mut kernel);

        assert_eq!(syscall(&mut cpu, &mut kernel, &[SYSCALL_EXEC]), Flow::Continue);

        let child = kernel.current_process().unwrap();
        assert_ne!(child, parent);
        assert_eq!(cpu.registers().lim() - cpu.registers().base() + 1, 60);
        assert_eq!(kernel.programs().programs()[0].call_count, 1);
    }

    #[test]
    fn test_syscall_coredump_records_stack_and_exits() {
        let (mut cpu, mut kernel) = machine();
        let pid = spawn(&mut cpu, &mut kernel);

        let flow = syscall(&mut cpu, &mut kernel, &[1, 2, 3, 4, SYSCALL_COREDUMP]);

        assert_eq!(flow, Flow::Halt(crate::kernel::HaltReason::Completed));
        let dump = &kernel.core_dumps()[0];
        assert_eq!(dump.pid, pid);
        assert_eq!(dump.stack, vec![4, 3, 2]);
        assert_eq!(kernel.process_count(), 0);
    }

    #[test]
    fn test_syscall_unknown_number_is_ignored() {
        let (mut cpu, mut kernel) = machine();
        spawn(&mut cpu, &mut kernel);
        assert_eq!(syscall(&mut cpu, &mut kernel, &[42]), Flow::Continue);
        assert_eq!(kernel.process_count(), 1);
    }
}
