//! Credential provisioning over the short-range radio
//!
//! In Configuration mode the device advertises one radio service with three
//! attributes:
//!
//! | Attribute | Access       | Purpose                          |
//! |-----------|--------------|----------------------------------|
//! | SSID      | write        | Wi-Fi network name               |
//! | Secret    | write        | Wi-Fi password                   |
//! | Status    | read, notify | feedback after each commit       |
//!
//! A single radio write carries at most [`MAX_WRITE_PAYLOAD`] bytes, so the
//! client frames every value as a transfer:
//!
//! ```text
//! write "["        start marker, clears the attribute's buffer
//! write "he"       appended
//! write "llo"      appended
//! write "]"        end marker, commits "hello" to storage
//! ```
//!
//! The markers are bare `"["` and `"]"` payloads with no escaping, so a
//! credential chunk can never consist of exactly one of those characters.
//!
//! Radio callbacks run in the radio stack's context. They only push a
//! [`ConfigEvent`] onto a [`ConfigEventQueue`]; the main loop drains the queue
//! and runs [`WirelessConfigChannel::handle_event`] to completion for each
//! event.

mod buffer;
mod channel;

pub use buffer::*;
pub use channel::*;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use thiserror_no_std::Error;

use crate::config::{WIFI_PASS_KEY, WIFI_SSID_KEY};
use crate::storage::StoreError;

/// Largest payload of a single attribute write (default ATT MTU minus header).
pub const MAX_WRITE_PAYLOAD: usize = 20;

/// Number of radio events that can wait for the main loop.
pub const CONFIG_EVENT_CAPACITY: usize = 16;

/// Payload of a single start-of-transfer write.
pub const START_MARKER: &str = "[";

/// Payload of a single end-of-transfer write.
pub const END_MARKER: &str = "]";

pub type WritePayload = heapless::String<MAX_WRITE_PAYLOAD>;

/// Queue from radio callbacks to the main loop.
pub type ConfigEventQueue = Channel<CriticalSectionRawMutex, ConfigEvent, CONFIG_EVENT_CAPACITY>;

/// Writable attributes of the configuration service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigAttribute {
    Ssid,
    Secret,
}

impl ConfigAttribute {
    /// Storage key the committed value is persisted under.
    pub const fn storage_key(self) -> &'static str {
        match self {
            Self::Ssid => WIFI_SSID_KEY,
            Self::Secret => WIFI_PASS_KEY,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Ssid => "ssid",
            Self::Secret => "pass",
        }
    }
}

/// Something the radio stack reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEvent {
    Connected,
    Disconnected,
    Write {
        attribute: ConfigAttribute,
        payload: WritePayload,
    },
}

impl ConfigEvent {
    /// Build a write event, or `None` if `payload` exceeds one radio write.
    pub fn write(attribute: ConfigAttribute, payload: &str) -> Option<Self> {
        let payload = WritePayload::try_from(payload).ok()?;
        Some(Self::Write { attribute, payload })
    }
}

/// Radio service hosting the configuration attributes.
///
/// Implementations create the service, advertise it and forward attribute
/// writes and connection changes into a [`ConfigEventQueue`].
pub trait ConfigRadio {
    type Error: core::fmt::Debug;

    /// Initialise the radio and start advertising under `device_name`.
    fn start(&mut self, device_name: &str) -> Result<(), Self::Error>;

    /// Stop advertising and release the radio.
    fn stop(&mut self) -> Result<(), Self::Error>;

    /// Update the status attribute and notify a connected client.
    fn notify_status(&mut self, status: &str);
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningError {
    #[error("Configuration channel is already active")]
    AlreadyActive,
    #[error("Configuration channel is not active")]
    NotActive,
    #[error("Radio failure")]
    Radio,
    #[error("Failed to persist credential: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ProvisioningError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}
