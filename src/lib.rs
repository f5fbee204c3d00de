//! A small simulated computer and the operating system that runs on it.
//!
//! `kernel` holds the machine (RAM, MMU, CPU, interrupt controller) and the
//! operating system (process table, schedulers, system calls). `io` holds
//! everything that crosses the simulation boundary: programs and their
//! loader, devices, core dumps.

pub mod config;
pub mod error;
pub mod io;
pub mod kernel;

pub use config::{FaultPolicy, SimConfig, TranslationMode};
pub use error::{Result, SimError};
pub use kernel::{Driver, HaltReason, RunSummary};
