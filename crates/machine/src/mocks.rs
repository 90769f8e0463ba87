//! Test doubles for the machine-context traits.
//!
//! Used by this crate's own tests and, behind the `mocks` feature, by the
//! peripheral crates' unit and scenario tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::bus::{Bus, BusError};
use crate::gpio::GpioLine;

/// Sparse RAM covering the whole 32-bit space.
///
/// Every address is mapped; unwritten bytes read as zero. Good enough for
/// DMA scenario tests that place buffers at arbitrary addresses.
#[derive(Default)]
pub struct SparseRam {
    bytes: HashMap<u32, u8>,
    copy_log: Vec<CopyRecord>,
}

/// One `copy_block` call observed by [`SparseRam`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyRecord {
    /// Source address of the copy.
    pub src: u32,
    /// Destination address of the copy.
    pub dst: u32,
    /// Length in bytes.
    pub len: usize,
}

impl SparseRam {
    /// Create an empty RAM.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill `len` bytes starting at `addr` with an ascending pattern
    /// `seed, seed+1, ...`.
    pub fn fill_pattern(&mut self, addr: u32, len: usize, seed: u8) {
        for i in 0..len {
            self.bytes
                .insert(addr.wrapping_add(i as u32), seed.wrapping_add(i as u8));
        }
    }

    /// Copies issued through the copy engine, in order.
    pub fn copies(&self) -> &[CopyRecord] {
        &self.copy_log
    }
}

impl Bus for SparseRam {
    fn read_byte(&mut self, addr: u32) -> Result<u8, BusError> {
        Ok(self.bytes.get(&addr).copied().unwrap_or(0))
    }

    fn write_byte(&mut self, addr: u32, value: u8) -> Result<(), BusError> {
        self.bytes.insert(addr, value);
        Ok(())
    }

    fn copy_block(&mut self, src: u32, dst: u32, len: usize) -> Result<(), BusError> {
        self.copy_log.push(CopyRecord { src, dst, len });
        for i in 0..len {
            let offset = i as u32;
            let byte = self.read_byte(src.wrapping_add(offset))?;
            self.write_byte(dst.wrapping_add(offset), byte)?;
        }
        Ok(())
    }
}

/// Records every level transition of a [`GpioLine`].
pub struct LineProbe {
    transitions: Arc<Mutex<Vec<bool>>>,
}

impl LineProbe {
    /// Attach a probe to `line`.
    pub fn attach(line: &GpioLine) -> Self {
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let log = transitions.clone();
        line.on_change(move |level| {
            if let Ok(mut seen) = log.lock() {
                seen.push(level);
            }
        });
        Self { transitions }
    }

    /// All transitions seen so far, oldest first.
    pub fn transitions(&self) -> Vec<bool> {
        self.transitions.lock().map(|t| t.clone()).unwrap_or_default()
    }

    /// Number of rising edges seen.
    pub fn rising_edges(&self) -> usize {
        self.transitions().iter().filter(|&&level| level).count()
    }
}
