//! BLE connection lifecycle orchestrator for a single authenticated link.
//!
//! The connection core is portable and testable on the host (no embedded
//! hardware required): it talks to the radio only through the
//! [`stack::HostStack`] trait.  The `embedded` feature adds the
//! nRF52840/SoftDevice binding and the doorbell firmware binary.
//!
//! Usage: `cargo test` on the host, `cargo build --features embedded`
//! for the target.

#![cfg_attr(not(test), no_std)]

// Declared first so the logging macros reach every other module.
mod fmt;

pub mod adv;
pub mod callbacks;
pub mod config;
pub mod conn;
pub mod doorbell;
pub mod error;
pub mod stack;

#[cfg(feature = "embedded")]
pub mod sd;

pub use callbacks::{CallbackTable, PASSKEY_ABORTED};
pub use conn::{
    Central, ConnLoop, FoundDisposition, LifecycleState, PairingRequest, PasskeyOutcome,
    Peripheral, RoleStrategy,
};
pub use doorbell::DoorbellRing;
pub use error::{Error, StackError};
pub use stack::{DisconnectReason, HostStack, IoCapability, SecurityLevel};
