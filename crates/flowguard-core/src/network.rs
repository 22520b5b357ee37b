//! Wi-Fi station and connectivity indication

use embassy_time::{Duration, Instant};
use embedded_hal::digital::OutputPin;
use log::{info, warn};

use crate::config::WifiCredentials;

/// Wi-Fi station interface.
pub trait WifiStation {
    type Error: core::fmt::Debug;

    /// Start associating with the given network. Connection completes
    /// asynchronously; poll [`is_connected`](Self::is_connected).
    fn begin(&mut self, credentials: &WifiCredentials) -> Result<(), Self::Error>;

    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;
}

/// What changed since the previous [`ConnectivityMonitor::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkChange {
    Unchanged,
    Connected,
    Disconnected,
}

/// Tracks the connection state and drives the Wi-Fi indicator LED.
///
/// The LED is solid while connected and toggles every blink interval while
/// not.
pub struct ConnectivityMonitor<P> {
    led: P,
    blink_interval: Duration,
    led_on: bool,
    last_toggle: Option<Instant>,
    connected: bool,
}

impl<P: OutputPin> ConnectivityMonitor<P> {
    pub fn new(led: P, blink_interval: Duration) -> Self {
        Self {
            led,
            blink_interval,
            led_on: false,
            last_toggle: None,
            connected: false,
        }
    }

    /// Feed the current connection state, returning the edge if any.
    pub fn update(&mut self, now: Instant, connected: bool) -> LinkChange {
        let change = match (self.connected, connected) {
            (false, true) => {
                info!("Network: Wi-Fi connected");
                LinkChange::Connected
            }
            (true, false) => {
                warn!("Network: Wi-Fi connection lost");
                LinkChange::Disconnected
            }
            _ => LinkChange::Unchanged,
        };
        self.connected = connected;

        if connected {
            self.set_led(true);
        } else {
            let due = self.last_toggle.is_none_or(|last| {
                now.checked_duration_since(last)
                    .is_some_and(|elapsed| elapsed >= self.blink_interval)
            });
            if due {
                self.set_led(!self.led_on);
                self.last_toggle = Some(now);
            }
        }

        change
    }

    /// Turn the indicator off and forget the connection, so the next
    /// connection is reported as an edge again.
    pub fn reset(&mut self) {
        self.connected = false;
        self.last_toggle = None;
        self.set_led(false);
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn led_on(&self) -> bool {
        self.led_on
    }

    pub fn led(&self) -> &P {
        &self.led
    }

    fn set_led(&mut self, on: bool) {
        let result = if on {
            self.led.set_high()
        } else {
            self.led.set_low()
        };
        match result {
            Ok(()) => self.led_on = on,
            Err(e) => warn!("Network: failed to drive indicator LED: {:?}", e),
        }
    }
}
