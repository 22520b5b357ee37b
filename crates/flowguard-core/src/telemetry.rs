//! Outbound telemetry
//!
//! Readings leave the device over a message socket as plain `key=value` ASCII
//! text, one pair per message:
//!
//! ```text
//! aflow=12.50     average flow over all sensors (L/min)
//! leak=2          leak segment, 0 = none, -1 = not enough sensors
//! ```
//!
//! The reporter only sends a value when it differs from the last value that
//! was actually delivered, and only while the link is up.

use core::fmt::{Display, Write};

use embassy_time::{Duration, Instant};
use embedded_hal::delay::DelayNs;
use heapless::String;
use log::{debug, info, warn};

/// Key of the average-flow message.
pub const AVERAGE_FLOW_KEY: &str = "aflow";

/// Key of the leak-segment message.
pub const LEAK_KEY: &str = "leak";

pub const MAX_MESSAGE_LEN: usize = 32;

pub type Message = String<MAX_MESSAGE_LEN>;

/// Outbound message channel to the monitoring server.
pub trait TelemetryLink {
    type Error: core::fmt::Debug;

    /// Open the connection to `host:port` at `path`.
    fn connect(&mut self, host: &str, port: u16, path: &str) -> Result<(), Self::Error>;

    /// Send one text message. Returns `false` if it was not delivered.
    fn send(&mut self, text: &str) -> bool;

    /// Service the connection (keep-alives, inbound frames).
    fn poll(&mut self);

    fn is_connected(&self) -> bool;
}

/// Format a single `key=value` message.
///
/// Returns `None` if the message would not fit in [`MAX_MESSAGE_LEN`].
pub fn format_message(key: &str, value: impl Display) -> Option<Message> {
    let mut message = Message::new();
    write!(message, "{}={}", key, value).ok()?;
    Some(message)
}

/// Block until `ready` returns true, sleeping `retry_ms` between checks.
///
/// This is the one intentional blocking point of the main loop: it is only
/// used right before the telemetry link is opened, when the network has
/// reported that it is up.
pub fn wait_until<D: DelayNs>(delay: &mut D, retry_ms: u32, mut ready: impl FnMut() -> bool) -> u32 {
    let mut retries = 0;
    while !ready() {
        delay.delay_ms(retry_ms);
        retries += 1;
    }
    retries
}

/// Snapshot of what the detector currently reports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowReport {
    /// `None` when no sensor is registered.
    pub average_flow: Option<f32>,
    pub leak_code: i8,
}

/// Which messages a [`TelemetryReporter::report`] call delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportOutcome {
    pub flow_sent: bool,
    pub leak_sent: bool,
}

/// Periodic change-only reporting of flow and leak state.
pub struct TelemetryReporter {
    interval: Duration,
    last_report: Option<Instant>,
    last_flow: Option<f32>,
    last_leak: Option<i8>,
}

impl TelemetryReporter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_report: None,
            last_flow: None,
            last_leak: None,
        }
    }

    /// Whether a report interval has passed since the last report.
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_report {
            None => true,
            Some(last) => now
                .checked_duration_since(last)
                .is_some_and(|elapsed| elapsed > self.interval),
        }
    }

    /// Send whatever changed since the last delivered report.
    ///
    /// The report time advances even when the link is down, so a missing
    /// network does not turn every iteration into a report attempt.
    pub fn report<L: TelemetryLink>(
        &mut self,
        now: Instant,
        report: FlowReport,
        link: &mut L,
    ) -> ReportOutcome {
        self.skip(now, report);

        let mut outcome = ReportOutcome::default();
        if !link.is_connected() {
            debug!("Telemetry: link down, skipping report");
            return outcome;
        }

        if let Some(flow) = report.average_flow {
            if self.last_flow != Some(flow) {
                outcome.flow_sent = Self::deliver(link, AVERAGE_FLOW_KEY, format_args!("{:.2}", flow));
                if outcome.flow_sent {
                    self.last_flow = Some(flow);
                }
            }
        }

        if self.last_leak != Some(report.leak_code) {
            outcome.leak_sent = Self::deliver(link, LEAK_KEY, report.leak_code);
            if outcome.leak_sent {
                self.last_leak = Some(report.leak_code);
            }
        }

        outcome
    }

    /// Log the readings and restart the interval without sending anything.
    ///
    /// Used while the network is down.
    pub fn skip(&mut self, now: Instant, report: FlowReport) {
        self.last_report = Some(now);

        if let Some(flow) = report.average_flow {
            info!("Telemetry: water flow {} L/min", flow);
        }
        info!("Telemetry: water leak {}", report.leak_code);
    }

    /// Forget what was delivered, so the next report resends everything.
    pub fn reset(&mut self) {
        self.last_flow = None;
        self.last_leak = None;
    }

    fn deliver<L: TelemetryLink>(link: &mut L, key: &str, value: impl Display) -> bool {
        let Some(message) = format_message(key, value) else {
            warn!("Telemetry: '{}' message does not fit in {} bytes", key, MAX_MESSAGE_LEN);
            return false;
        };

        let sent = link.send(&message);
        if !sent {
            warn!("Telemetry: failed to send '{}'", message);
        }
        sent
    }
}
