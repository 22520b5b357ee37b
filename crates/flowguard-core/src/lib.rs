//! Hardware-independent core library for flowguard
//!
//! This crate contains all platform-agnostic logic of the water-leak monitor:
//! pulse-rate flow sensing, the leak detector, partitioned persistent storage,
//! wireless credential provisioning, mode switching and telemetry reporting.
//!
//! It is `no_std` with `extern crate alloc` so it compiles on both embedded
//! targets (ESP32) and desktop hosts (for the simulator and tests). Hardware
//! is reached only through the traits in [`app_state::Platform`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod app_state;
pub mod config;
pub mod leak;
pub mod mode;
pub mod network;
pub mod provisioning;
pub mod sensors;
pub mod storage;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod test_support;

pub use app_state::{App, AppError, AppRunState, AppState, Hardware, Platform};
pub use leak::LeakDetector;
pub use mode::{DeviceMode, ModeController};
pub use provisioning::WirelessConfigChannel;
pub use sensors::{PulseCounter, PulseRateSensor};
pub use storage::PartitionedStore;
