use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, SimError};
use crate::kernel::cpu::INSTRUCTION_SIZE;
use crate::kernel::Mmu;

pub const DEFAULT_MEMORY_SIZE: usize = 3000;
pub const DEFAULT_CLOCK_PERIOD: u64 = 5;
pub const DEFAULT_CONTEXT_SWITCH_TICKS: u64 = 3;
pub const DEFAULT_ALLOC_SIZE: usize = 300;

/// Smallest memory that can still hold a process.
const MINIMUM_PROCESS_WORDS: usize = INSTRUCTION_SIZE * 4;

/// What the kernel does when a process triggers a hardware fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FaultPolicy {
    /// Terminate the offending process and keep scheduling the others.
    TerminateProcess,
    /// Stop the whole simulation.
    Halt,
}

/// Which address translation strategy the MMU uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TranslationMode {
    Segment,
    Paged,
}

/// Simulation parameters. Every component receives what it needs from here
/// at construction time.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub memory_size: usize,
    pub memory_latency_ns: u64,
    pub clock_period: u64,
    pub context_switch_ticks: u64,
    pub fault_policy: FaultPolicy,
    pub translation: TranslationMode,
    pub page_size: usize,
    pub default_alloc_size: usize,
    pub device_delay_ms: u64,
    pub max_ticks: Option<u64>,
    pub verbose: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            memory_size: DEFAULT_MEMORY_SIZE,
            memory_latency_ns: 0,
            clock_period: DEFAULT_CLOCK_PERIOD,
            context_switch_ticks: DEFAULT_CONTEXT_SWITCH_TICKS,
            fault_policy: FaultPolicy::TerminateProcess,
            translation: TranslationMode::Segment,
            page_size: crate::kernel::mmu::DEFAULT_PAGE_SIZE,
            default_alloc_size: DEFAULT_ALLOC_SIZE,
            device_delay_ms: 5,
            max_ticks: None,
            verbose: false,
        }
    }
}

impl SimConfig {
    pub fn from_toml_str(content: &str) -> Result<SimConfig> {
        let config: SimConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<SimConfig> {
        log::info!("Loading config from: {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|source| SimError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        SimConfig::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.clock_period == 0 {
            return Err(SimError::Config("clock_period must be at least 1".into()));
        }
        if self.memory_size < MINIMUM_PROCESS_WORDS {
            return Err(SimError::Config(format!(
                "memory_size {} is too small to hold a process",
                self.memory_size
            )));
        }
        if self.translation == TranslationMode::Paged {
            let mmu = Mmu::paged(self.memory_size, self.page_size);
            let usable = mmu
                .addressable_words(self.memory_size)
                .saturating_sub(mmu.reserved_words());
            if usable < MINIMUM_PROCESS_WORDS {
                return Err(SimError::Config(format!(
                    "paged memory_size {} leaves no room for processes (page_size {})",
                    self.memory_size, self.page_size
                )));
            }
        }
        if self.default_alloc_size == 0 {
            return Err(SimError::Config("default_alloc_size must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_are_valid() {
        let config = SimConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fault_policy, FaultPolicy::TerminateProcess);
        assert_eq!(config.translation, TranslationMode::Segment);
    }

    #[test]
    fn test_config_from_toml_overrides_some_fields() {
        let config = SimConfig::from_toml_str(
            r#"
            memory_size = 1000
            clock_period = 7
            fault_policy = "halt"
            translation = "paged"
            "#,
        )
        .unwrap();

        assert_eq!(config.memory_size, 1000);
        assert_eq!(config.clock_period, 7);
        assert_eq!(config.fault_policy, FaultPolicy::Halt);
        assert_eq!(config.translation, TranslationMode::Paged);
        assert_eq!(config.default_alloc_size, DEFAULT_ALLOC_SIZE);
    }

    #[test]
    fn test_config_rejects_zero_clock_period() {
        let result = SimConfig::from_toml_str("clock_period = 0");
        assert!(matches!(result, Err(SimError::Config(_))));
    }

    #[test]
    fn test_config_rejects_paged_memory_smaller_than_a_page() {
        let result = SimConfig::from_toml_str(
            r#"
            memory_size = 200
            translation = "paged"
            "#,
        );
        assert!(matches!(result, Err(SimError::Config(_))));

        // the same memory is fine without paging
        assert!(SimConfig::from_toml_str("memory_size = 200").is_ok());
    }

    #[test]
    fn test_config_accepts_paged_memory_with_small_pages() {
        let config = SimConfig::from_toml_str(
            r#"
            memory_size = 1000
            translation = "paged"
            page_size = 64
            "#,
        )
        .unwrap();
        assert_eq!(config.translation, TranslationMode::Paged);
    }

    #[test]
    fn test_config_rejects_malformed_toml() {
        let result = SimConfig::from_toml_str("memory_size = \"lots\"");
        assert!(matches!(result, Err(SimError::ConfigParse(_))));
    }
}
