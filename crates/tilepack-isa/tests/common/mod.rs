//! Shared utilities for integration tests

#![allow(dead_code)]

use tilepack_isa::{ExecutionContext, MemoryDevice};

pub const BASE_ADDRESS: u64 = 0x4_0000_0000;
pub const PAGE: usize = 4096;

/// A context over a 4 MiB in-memory device
pub fn memory_context() -> ExecutionContext<MemoryDevice> {
    ExecutionContext::new(MemoryDevice::new(BASE_ADDRESS, PAGE, 1024 * PAGE)).unwrap()
}

/// Little-endian `u32` at word `index` of a record
pub fn word(record: &[u8], index: usize) -> u32 {
    let at = index * 4;
    u32::from_le_bytes([record[at], record[at + 1], record[at + 2], record[at + 3]])
}
