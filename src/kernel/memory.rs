use std::thread;
use std::time::Duration;

use super::Word;

/// Flat word-addressed physical memory.
///
/// Addresses handed to `Memory` are physical and already validated by the
/// MMU or the kernel; an out of range access is a simulator bug and panics.
pub struct Memory {
    data: Vec<Word>,
    latency: Duration,
}

impl Memory {
    pub fn new(size: usize) -> Memory {
        Memory::with_latency(size, Duration::ZERO)
    }

    pub fn with_latency(size: usize, latency: Duration) -> Memory {
        Memory {
            data: vec![0; size],
            latency,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn read_from(&self, address: usize) -> Word {
        if address >= self.data.len() {
            panic!("Out of bounds memory access. Address {} is greater than memory size", address);
        }

        self.delay();
        self.data[address]
    }

    /// Reads `[start_address, end_address)`.
    pub fn read_block_from(&self, start_address: usize, end_address: usize) -> Vec<Word> {
        if start_address > self.data.len() || end_address > self.data.len() {
            panic!("Out of bounds memory access. Start or end address is greater than memory size");
        } else if start_address > end_address {
            panic!("Invalid memory range. Start address is greater than end address");
        }

        self.delay();
        self.data[start_address..end_address].to_vec()
    }

    pub fn write_to(&mut self, address: usize, value: Word) {
        if address >= self.data.len() {
            panic!("Out of bounds memory access. Address {} is greater than memory size", address);
        }

        self.delay();
        self.data[address] = value;
    }

    pub fn write_block_to(&mut self, address: usize, data: &[Word]) {
        let start_address = address;
        let end_address = address + data.len();

        if end_address > self.data.len() {
            panic!("Out of bounds memory access");
        }

        self.delay();
        self.data[start_address..end_address].copy_from_slice(data);
    }

    /// Moves `len` words from `from` to `to`. The ranges may overlap.
    pub fn copy_within(&mut self, from: usize, to: usize, len: usize) {
        if from + len > self.data.len() || to + len > self.data.len() {
            panic!("Out of bounds memory access");
        }

        self.delay();
        self.data.copy_within(from..from + len, to);
    }

    fn delay(&self) {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_read_from() {
        let memory = Memory::new(1024);
        assert_eq!(memory.read_from(0), 0);
    }

    #[test]
    #[should_panic]
    fn test_memory_out_of_bounds_read_from() {
        let memory = Memory::new(1024);
        memory.read_from(1024);
    }

    #[test]
    fn test_memory_write_to() {
        let mut memory = Memory::new(1024);
        memory.write_to(0, -10);
        assert_eq!(memory.read_from(0), -10);
    }

    #[test]
    #[should_panic]
    fn test_memory_out_of_bounds_write_to() {
        let mut memory = Memory::new(1024);
        memory.write_to(1024, 10);
    }

    #[test]
    #[should_panic]
    fn test_memory_invalid_range_read_block_from() {
        let memory = Memory::new(1024);
        memory.read_block_from(5, 0);
    }

    #[test]
    fn test_memory_write_block_to() {
        let mut memory = Memory::new(1024);
        memory.write_block_to(3, &[1, 2, 3, 4, 5]);
        assert_eq!(memory.read_block_from(3, 8), &[1, 2, 3, 4, 5]);
    }

    #[test]
    #[should_panic]
    fn test_memory_out_of_bounds_write_block_to() {
        let mut memory = Memory::new(1024);
        memory.write_block_to(1020, &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_memory_copy_within_overlapping_down() {
        let mut memory = Memory::new(16);
        memory.write_block_to(4, &[1, 2, 3, 4, 5, 6]);
        memory.copy_within(4, 2, 6);
        assert_eq!(memory.read_block_from(2, 8), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_memory_latency_is_optional() {
        let mut memory = Memory::with_latency(8, Duration::from_nanos(10));
        memory.write_to(7, 3);
        assert_eq!(memory.read_from(7), 3);
    }
}
