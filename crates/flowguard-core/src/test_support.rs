//! Host doubles for the hardware seams, shared by the unit tests.

use std::string::{String, ToString};
use std::vec::Vec;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{self, ErrorKind, ErrorType, InputPin, OutputPin};

use crate::config::WifiCredentials;
use crate::network::WifiStation;
use crate::provisioning::ConfigRadio;
use crate::sensors::{EdgeInterrupts, LineId, PulseCounter, SensorError};
use crate::telemetry::TelemetryLink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinFault;

impl digital::Error for PinFault {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Records which lines had an interrupt attached.
#[derive(Default)]
pub struct RecordingInterrupts {
    pub attached: Vec<LineId>,
    pub refuse: bool,
}

impl<'a> EdgeInterrupts<'a> for RecordingInterrupts {
    fn attach(&mut self, line: LineId, _counter: &'a PulseCounter) -> Result<(), SensorError> {
        if self.refuse {
            return Err(SensorError::InterruptUnavailable(line));
        }
        self.attached.push(line);
        Ok(())
    }
}

/// Input pin replaying a fixed sequence of levels; the last level repeats.
pub struct ScriptedPin {
    levels: Vec<bool>,
    reads: usize,
    fail_after: Option<usize>,
}

impl ScriptedPin {
    pub fn new(levels: &[bool]) -> Self {
        Self {
            levels: levels.to_vec(),
            reads: 0,
            fail_after: None,
        }
    }

    /// Every read after the first `reads` ones fails.
    pub fn failing_after(mut self, reads: usize) -> Self {
        self.fail_after = Some(reads);
        self
    }
}

impl ErrorType for ScriptedPin {
    type Error = PinFault;
}

impl InputPin for ScriptedPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        let read = self.reads;
        self.reads += 1;
        if self.fail_after.is_some_and(|limit| read >= limit) {
            return Err(PinFault);
        }
        let index = read.min(self.levels.len().saturating_sub(1));
        Ok(self.levels.get(index).copied().unwrap_or(false))
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}

#[derive(Default)]
pub struct MockLed {
    pub is_high: bool,
    pub broken: bool,
}

impl ErrorType for MockLed {
    type Error = PinFault;
}

impl OutputPin for MockLed {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        if self.broken {
            return Err(PinFault);
        }
        self.is_high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        if self.broken {
            return Err(PinFault);
        }
        self.is_high = true;
        Ok(())
    }
}

/// Delay that returns immediately and adds up what was requested.
#[derive(Default)]
pub struct CountingDelay {
    pub total_ms: u32,
}

impl DelayNs for CountingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ms += ns / 1_000_000;
    }

    fn delay_ms(&mut self, ms: u32) {
        self.total_ms += ms;
    }
}

#[derive(Default)]
pub struct MockRadio {
    pub started: usize,
    pub stopped: usize,
    pub advertised_as: Option<String>,
    pub notifications: Vec<String>,
    pub fail_start: bool,
}

impl ConfigRadio for MockRadio {
    type Error = &'static str;

    fn start(&mut self, device_name: &str) -> Result<(), Self::Error> {
        if self.fail_start {
            return Err("radio offline");
        }
        self.started += 1;
        self.advertised_as = Some(device_name.to_string());
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Self::Error> {
        self.stopped += 1;
        Ok(())
    }

    fn notify_status(&mut self, status: &str) {
        self.notifications.push(status.to_string());
    }
}

#[derive(Default)]
pub struct MockWifi {
    pub joined: Vec<WifiCredentials>,
    pub disconnects: usize,
    pub connected: bool,
}

impl WifiStation for MockWifi {
    type Error = &'static str;

    fn begin(&mut self, credentials: &WifiCredentials) -> Result<(), Self::Error> {
        self.joined.push(credentials.clone());
        Ok(())
    }

    fn disconnect(&mut self) {
        self.disconnects += 1;
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[derive(Default)]
pub struct MockLink {
    pub connected: bool,
    pub reject_sends: bool,
    pub endpoints: Vec<String>,
    pub sent: Vec<String>,
    pub polls: usize,
}

impl MockLink {
    pub fn connected() -> Self {
        Self {
            connected: true,
            ..Default::default()
        }
    }
}

impl TelemetryLink for MockLink {
    type Error = &'static str;

    fn connect(&mut self, host: &str, port: u16, path: &str) -> Result<(), Self::Error> {
        self.endpoints.push(std::format!("{}:{}{}", host, port, path));
        self.connected = true;
        Ok(())
    }

    fn send(&mut self, text: &str) -> bool {
        if self.reject_sends || !self.connected {
            return false;
        }
        self.sent.push(text.to_string());
        true
    }

    fn poll(&mut self) {
        self.polls += 1;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
