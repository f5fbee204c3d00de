use std::sync::Arc;
use std::time::Duration;

use super::*;

use crate::config::{SimConfig, TranslationMode};
use crate::error::Result;
use crate::io::{ConsoleDevice, Device, DeviceId, KeyboardDevice, Program};

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// `None` when the run was cut short by the tick limit.
    pub halt_reason: Option<HaltReason>,
    pub ticks: u64,
    pub steps: u64,
    pub process_stats: Vec<ProcessStats>,
}

/// Owns the whole machine: CPU (with RAM and MMU), the interrupt
/// controller shared with the device threads, and the kernel.
pub struct Driver {
    cpu: Cpu,
    kernel: Kernel,
    interrupts: Arc<InterruptController>,
    default_alloc_size: usize,
    device_delay: Duration,
    max_ticks: Option<u64>,
}

impl Driver {
    pub fn new(config: &SimConfig) -> Driver {
        let mut memory = Memory::with_latency(config.memory_size, Duration::from_nanos(config.memory_latency_ns));
        let mmu = match config.translation {
            TranslationMode::Segment => Mmu::segmented(),
            TranslationMode::Paged => Mmu::paged(config.memory_size, config.page_size),
        };
        mmu.install_identity_page_table(&mut memory);
        let allocator = Allocator::new(mmu.reserved_words(), mmu.addressable_words(config.memory_size));

        let interrupts = Arc::new(InterruptController::new());
        let mut cpu = Cpu::new(memory, mmu, interrupts.clone(), config.clock_period);
        cpu.set_verbose(config.verbose);

        Driver {
            cpu,
            kernel: Kernel::new(config, allocator),
            interrupts,
            default_alloc_size: config.default_alloc_size,
            device_delay: Duration::from_millis(config.device_delay_ms),
            max_ticks: config.max_ticks,
        }
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn interrupts(&self) -> Arc<InterruptController> {
        self.interrupts.clone()
    }

    pub fn register_device(&mut self, device: Box<dyn Device>) -> DeviceId {
        self.kernel.register_device(device)
    }

    /// Registers the keyboard and the console, in that order. Returns their
    /// ids.
    pub fn register_standard_devices(&mut self) -> (DeviceId, DeviceId) {
        let keyboard = KeyboardDevice::new(self.interrupts.clone(), self.device_delay);
        let console = ConsoleDevice::new(self.interrupts.clone(), self.device_delay);
        (
            self.register_device(Box::new(keyboard)),
            self.register_device(Box::new(console)),
        )
    }

    pub fn add_program(&mut self, program: Program) {
        self.kernel.add_program(program);
    }

    /// Starts a process running `program`. The partition size is, in order
    /// of preference, `alloc_size`, the program's own default, or the
    /// configured default.
    pub fn create_process(&mut self, program: &Program, alloc_size: Option<usize>) -> Result<ProcessId> {
        let alloc_size = alloc_size
            .or(program.default_alloc_size)
            .unwrap_or(self.default_alloc_size);
        self.kernel.create_process(&mut self.cpu, program, alloc_size)
    }

    /// Runs until the process table empties, the kernel halts the machine,
    /// or the tick limit is reached.
    pub fn run(&mut self) -> RunSummary {
        log::info!("Starting the driver with {} processes", self.kernel.process_count());

        let mut steps = 0;
        let halt_reason = if self.kernel.process_count() == 0 {
            Some(HaltReason::Completed)
        } else {
            loop {
                if let Some(max_ticks) = self.max_ticks {
                    if self.cpu.ticks() >= max_ticks {
                        log::warn!("Stopping after reaching the tick limit ({})", max_ticks);
                        break None;
                    }
                }

                steps += 1;
                if let Flow::Halt(reason) = self.cpu.step(&mut self.kernel) {
                    break Some(reason);
                }
            }
        };

        match halt_reason {
            Some(HaltReason::Completed) | None => log::info!("Simulation finished after {} ticks", self.cpu.ticks()),
            Some(reason) => log::error!("Simulation halted: {:?}", reason),
        }

        RunSummary {
            halt_reason,
            ticks: self.cpu.ticks(),
            steps,
            process_stats: self.kernel.finished().to_vec(),
        }
    }

    pub fn print_stats(summary: &RunSummary) {
        println!("Stats for executed processes ({} ticks):", summary.ticks);
        println!("... ID   | Ready | Avg Starve | Max Starve");
        println!("...------|-------|------------|-----------");
        for stats in &summary.process_stats {
            println!(
                "... {:04} | {:5} | {:10.2} | {:10}",
                stats.id, stats.num_ready, stats.avg_starve, stats.max_starve
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::program::exit_sequence;

    fn config() -> SimConfig {
        SimConfig {
            memory_size: 1000,
            device_delay_ms: 1,
            max_ticks: Some(100_000),
            ..SimConfig::default()
        }
    }

    #[test]
    fn test_driver_run_without_processes_completes() {
        let mut driver = Driver::new(&config());
        let summary = driver.run();
        assert_eq!(summary.halt_reason, Some(HaltReason::Completed));
        assert_eq!(summary.steps, 0);
    }

    #[test]
    fn test_driver_create_process_alloc_size_preference() {
        let mut driver = Driver::new(&config());
        let program = Program::new("p", exit_sequence().to_vec()).with_default_alloc_size(50);

        driver.create_process(&program, None).unwrap();
        assert_eq!(driver.cpu().registers().lim(), 49);

        driver.create_process(&program, Some(70)).unwrap();
        assert_eq!(driver.cpu().registers().base(), 50);
        assert_eq!(driver.cpu().registers().lim(), 119);

        let plain = Program::new("q", exit_sequence().to_vec());
        driver.create_process(&plain, None).unwrap();
        assert_eq!(driver.cpu().registers().lim() - driver.cpu().registers().base() + 1, 300);
    }

    #[test]
    fn test_driver_paged_mode_reserves_page_table() {
        let mut driver = Driver::new(&SimConfig {
            translation: TranslationMode::Paged,
            page_size: 64,
            ..config()
        });
        let program = Program::new("p", vec![Instruction::set(0, 3)]);
        driver.create_process(&program, Some(100)).unwrap();

        // 1000 words at 64 words per page: 15 pages, table in words 0..15
        assert_eq!(driver.cpu().registers().base(), 15);
        let summary = driver.run();
        assert_eq!(summary.halt_reason, Some(HaltReason::Completed));
    }

    #[test]
    fn test_driver_tick_limit() {
        let mut driver = Driver::new(&SimConfig { max_ticks: Some(50), ..config() });
        let spin = Program::new("spin", vec![Instruction::new(Opcode::Branch, 0, 0, 0)]);
        driver.create_process(&spin, None).unwrap();

        let summary = driver.run();
        assert_eq!(summary.halt_reason, None);
        assert!(summary.ticks >= 50);
    }
}
