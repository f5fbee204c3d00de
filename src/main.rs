use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use env_logger::Env;

use sos_simulator::io::loader;
use sos_simulator::kernel::Driver;
use sos_simulator::{FaultPolicy, HaltReason, SimConfig, TranslationMode};

#[derive(Parser)]
#[command(name = "sos-simulator")]
#[command(about = "Simulated computer and teaching operating system", long_about = None)]
struct Cli {
    /// Pidgin assembly programs; one process is started for each
    #[arg(required = true, value_name = "PROGRAM")]
    programs: Vec<PathBuf>,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Words of RAM
    #[arg(short, long)]
    memory_size: Option<usize>,

    /// Partition size for each started process
    #[arg(short, long)]
    alloc_size: Option<usize>,

    /// Halt the whole simulation on the first hardware fault
    #[arg(long)]
    halt_on_fault: bool,

    /// Use paged address translation
    #[arg(long)]
    paged: bool,

    /// Stop after this many ticks
    #[arg(long)]
    max_ticks: Option<u64>,

    /// Trace every executed instruction
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "trace" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    let mut config = match &cli.config {
        Some(path) => SimConfig::load(path)?,
        None => SimConfig::default(),
    };

    // Override with CLI options
    if let Some(memory_size) = cli.memory_size {
        config.memory_size = memory_size;
    }
    if let Some(max_ticks) = cli.max_ticks {
        config.max_ticks = Some(max_ticks);
    }
    if cli.halt_on_fault {
        config.fault_policy = FaultPolicy::Halt;
    }
    if cli.paged {
        config.translation = TranslationMode::Paged;
    }
    if cli.verbose {
        config.verbose = true;
    }
    config.validate()?;

    let mut driver = Driver::new(&config);
    driver.register_standard_devices();

    let mut programs = Vec::new();
    for path in &cli.programs {
        let program = loader::load_program(path)?;
        log::info!("Loaded '{}' ({} instructions)", program.name, program.instructions.len());
        driver.add_program(program.clone());
        programs.push(program);
    }
    for program in &programs {
        driver.create_process(program, cli.alloc_size)?;
    }

    let summary = driver.run();
    Driver::print_stats(&summary);

    match summary.halt_reason {
        Some(HaltReason::Completed) => Ok(()),
        Some(reason) => bail!("simulation halted: {:?}", reason),
        None => bail!("simulation stopped after {} ticks", summary.ticks),
    }
}
