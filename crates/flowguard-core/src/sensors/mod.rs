//! Pulse-based flow sensors
//!
//! A flow sensor emits one falling edge per fixed volume of water. The edge is
//! counted in interrupt context by a [`PulseCounter`], and the main loop turns
//! the accumulated count into a flow rate once per sampling window through a
//! [`PulseRateSensor`].
//!
//! # Interrupt safety
//!
//! The counter is the only state shared between interrupt context and the
//! main loop. Both sides go through `critical_section::with`, so the main
//! loop's read-and-reset can never interleave with an increment and no pulse
//! is lost or counted twice across a sample boundary.
//!
//! ```rust,ignore
//! static COUNTERS: [PulseCounter; 2] = [PulseCounter::new(), PulseCounter::new()];
//!
//! // In the GPIO interrupt handler
//! COUNTERS[0].record_edge();
//! ```

mod pulse_rate;

pub use pulse_rate::*;

use core::cell::Cell;

use critical_section::Mutex;
use thiserror_no_std::Error;

/// Identifies the input line (GPIO number) a flow sensor is wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineId(pub u8);

impl core::fmt::Display for LineId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "GPIO{}", self.0)
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum SensorError {
    #[error("Calibration factor {0} must be finite and positive")]
    InvalidCalibration(f32),
    #[error("Failed to attach edge interrupt on {0}")]
    InterruptUnavailable(LineId),
}

/// Raw pulse register written from interrupt context.
///
/// Increments wrap on overflow. At the pulse rates of household flow sensors
/// (well under 1 kHz) a `u32` cannot overflow inside one sampling window.
pub struct PulseCounter {
    count: Mutex<Cell<u32>>,
}

impl PulseCounter {
    pub const fn new() -> Self {
        Self {
            count: Mutex::new(Cell::new(0)),
        }
    }

    /// Record one qualifying edge. Safe to call from an interrupt handler.
    #[inline]
    pub fn record_edge(&self) {
        critical_section::with(|cs| {
            let count = self.count.borrow(cs);
            count.set(count.get().wrapping_add(1));
        });
    }

    /// Atomically read the accumulated count and reset it to zero.
    #[inline]
    pub fn take(&self) -> u32 {
        critical_section::with(|cs| self.count.borrow(cs).replace(0))
    }

    /// Current count without resetting it.
    pub fn pending(&self) -> u32 {
        critical_section::with(|cs| self.count.borrow(cs).get())
    }
}

impl Default for PulseCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Platform hook that routes falling edges on a line into a counter.
///
/// The firmware implements this by configuring the GPIO as a pulled-up input,
/// enabling its falling-edge interrupt and remembering which counter the
/// handler must bump. Host tests and the simulator implement it by keeping
/// the counter reference and calling [`PulseCounter::record_edge`] directly.
pub trait EdgeInterrupts<'a> {
    fn attach(&mut self, line: LineId, counter: &'a PulseCounter) -> Result<(), SensorError>;
}
