//! Machine-context abstractions for canlab emulation peripherals.
//!
//! A peripheral model never owns its surroundings: the bus fabric, the
//! interrupt wiring, and the virtual-time source all belong to the machine
//! that instantiates it. This crate defines the seams:
//!
//! - [`Bus`] — word/byte access plus the machine's memory-copy engine
//! - [`Peripheral`] — a mountable register region
//! - [`GpioLine`] — a level-based signal line with observers
//! - [`SyncScheduler`] — deferred execution at the next virtual-time sync
//!   point, used to keep IRQ edges out of the originating bus transaction
//!
//! # Example
//!
//! ```
//! use machine::{GpioLine, SyncScheduler, ImmediateSync};
//!
//! let irq = GpioLine::new("dma.stream0");
//! let sched = ImmediateSync;
//! let line = irq.clone();
//! sched.execute_in_nearest_synced_state(Box::new(move || line.raise()));
//! assert!(irq.level());
//! ```

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(unused_must_use)]
#![warn(missing_docs)]
#![warn(clippy::all)]
// ────────────────────────────────────────────────────────────────────────────

pub mod bus;
pub mod gpio;
pub mod peripheral;
pub mod sync;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

pub use bus::{Bus, BusError, SharedBus};
pub use gpio::GpioLine;
pub use peripheral::{AccessWidth, Peripheral};
pub use sync::{ImmediateSync, QueuedSync, SyncScheduler};
