//! STM32 peripheral models for canlab machines.
//!
//! Two controllers live here:
//!
//! - [`StmDma`] — the F2/F4-family DMA engine: eight streams, peripheral
//!   request gating, circular and one-shot transfers, scattered
//!   transfer-complete status bits.
//! - [`StmI2c`] — the F4-family I²C controller in master mode, driven by the
//!   SR1→SR2 read order the hardware contract requires.
//!
//! Both are mounted through [`machine::Peripheral`] and parameterized by the
//! owning machine's bus, scheduler, and signal lines.

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(unused_must_use)]
#![warn(missing_docs)]
#![warn(clippy::all)]
// ────────────────────────────────────────────────────────────────────────────

pub mod dma;
pub mod i2c;

pub use dma::StmDma;
pub use i2c::{DeviceError, I2cConfigError, I2cDevice, StmI2c};
