//! CAN-over-MQTT bridge.
//!
//! Transports classic-CAN frames between emulated machines through a shared
//! MQTT v5 broker. Frames publish per-channel/per-id under
//! `bus/can/{channel}/{cobId}`; the subscription uses the broker's no-local
//! option so a machine never hears its own traffic, with a per-instance
//! `pubId` as the second line of defense.
//!
//! The emulator-facing entry point, [`CanMqttBridge::on_frame_received`], is
//! a non-blocking enqueue; one tokio worker owns the broker connection and
//! retries it forever.

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(unused_must_use)]
#![warn(missing_docs)]
#![warn(clippy::all)]
// ────────────────────────────────────────────────────────────────────────────

mod binary;
mod bridge;
mod codec;
mod config;
mod frame;
mod json;
mod link;
mod topic;

pub use binary::BinaryCodec;
pub use bridge::CanMqttBridge;
pub use codec::{CodecError, FrameCodec, OptionalField, OptionalFields};
pub use config::{BridgeConfig, BrokerAddr, ConfigError, WireFormat};
pub use frame::{CanFrame, CobId, FrameError, FramePayload};
pub use json::JsonCodec;
pub use link::{LinkState, LinkWatch};
