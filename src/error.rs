use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures on the host side of the simulation: loading configuration and
/// programs, and placing processes in memory.
///
/// Hardware faults and syscall errors are not represented here; they are
/// delivered to the kernel and to the running program respectively.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("program is empty")]
    EmptyProgram,

    #[error("program of {program_size} words does not fit in a {alloc_size} word partition")]
    ProgramTooLarge { program_size: usize, alloc_size: usize },

    #[error("not enough memory for a {requested} word partition ({free} words free)")]
    OutOfMemory { requested: usize, free: usize },
}

pub type Result<T> = std::result::Result<T, SimError>;
