use embassy_time::{Duration, Instant};
use log::debug;

use super::{EdgeInterrupts, LineId, PulseCounter, SensorError};
use crate::config::SAMPLE_WINDOW;

const MICROS_PER_SECOND: f32 = 1_000_000.0;
const SECONDS_PER_MINUTE: f32 = 60.0;

/// Flow sensor that derives a rate from pulses counted over a sampling window.
///
/// Rates are in litres per minute when the calibration factor is expressed in
/// pulses per second per L/min (7.5 for the common YF-S201 hall sensor).
/// The accumulated volume is in litres.
pub struct PulseRateSensor<'a> {
    line: LineId,
    counter: &'a PulseCounter,
    calibration_factor: f32,
    last_sample: Instant,
    flow_rate: f32,
    total_litres: f32,
}

impl<'a> PulseRateSensor<'a> {
    /// Attach the edge interrupt for `line` and start counting into `counter`.
    ///
    /// The first window is measured from boot (tick zero), matching the way
    /// the sampling loop starts on hardware.
    pub fn register<I>(
        line: LineId,
        calibration_factor: f32,
        counter: &'a PulseCounter,
        interrupts: &mut I,
    ) -> Result<Self, SensorError>
    where
        I: EdgeInterrupts<'a>,
    {
        if !calibration_factor.is_finite() || calibration_factor <= 0.0 {
            return Err(SensorError::InvalidCalibration(calibration_factor));
        }

        // Pulses left over from a previous owner of this counter would
        // inflate the first window.
        counter.take();
        interrupts.attach(line, counter)?;

        Ok(Self {
            line,
            counter,
            calibration_factor,
            last_sample: Instant::from_ticks(0),
            flow_rate: 0.0,
            total_litres: 0.0,
        })
    }

    /// Update the flow rate if a full sampling window has elapsed.
    ///
    /// Calling this more often than once per window is harmless; early calls
    /// return `false` without touching the counter.
    pub fn sample(&mut self, now: Instant) -> bool {
        let elapsed = match now.checked_duration_since(self.last_sample) {
            Some(elapsed) => elapsed,
            None => return false,
        };

        if elapsed < SAMPLE_WINDOW || elapsed == Duration::from_ticks(0) {
            return false;
        }

        let count = self.counter.take();

        let elapsed_us = elapsed.as_micros() as f32;
        let frequency = count as f32 * (MICROS_PER_SECOND / elapsed_us);
        self.flow_rate = frequency / self.calibration_factor;
        self.total_litres += (self.flow_rate / SECONDS_PER_MINUTE) * (elapsed_us / MICROS_PER_SECOND);
        self.last_sample = now;

        debug!(
            "Flow sensor {}: {} pulses in {} ms -> {} L/min",
            self.line,
            count,
            elapsed.as_millis(),
            self.flow_rate
        );

        true
    }

    pub fn line(&self) -> LineId {
        self.line
    }

    pub fn calibration_factor(&self) -> f32 {
        self.calibration_factor
    }

    /// Flow rate measured over the last completed window (L/min).
    pub fn flow_rate(&self) -> f32 {
        self.flow_rate
    }

    /// Volume accumulated since registration (litres).
    pub fn total_volume(&self) -> f32 {
        self.total_litres
    }

    pub fn last_sample(&self) -> Instant {
        self.last_sample
    }
}
