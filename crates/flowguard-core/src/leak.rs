//! Leak detection across a chain of flow sensors
//!
//! Sensors are registered in physical order along the pipe run, sensor 0
//! being the most upstream. Water that enters the run must leave through the
//! downstream sensors, so a flow imbalance between the upstream anchor and a
//! downstream sensor points at a leak in between.
//!
//! # Scan
//!
//! [`LeakDetector::leak_segment`] anchors on sensor 0 and walks from the most
//! downstream sensor towards the anchor, stopping at the first sensor whose
//! rate agrees with the anchor:
//!
//! ```text
//! rates   [10, 10, 25]
//! index    0   1   2
//!          ^       ^ imbalanced -> step upstream
//!          ^   ^     balanced   -> stop at 1, report segment 2
//! ```
//!
//! A result of 0 means the downstream end agrees with the anchor (no leak).

use embassy_time::Instant;
use heapless::Vec;
use log::{debug, warn};
use thiserror_no_std::Error;

use crate::config::{LEAK_THRESHOLD, MAX_FLOW_SENSORS};
use crate::sensors::{EdgeInterrupts, LineId, PulseCounter, PulseRateSensor, SensorError};

/// Minimum number of sensors needed to compare flows.
pub const MIN_SENSORS_FOR_DETECTION: usize = 2;

/// Wire value reported when detection cannot run.
pub const INSUFFICIENT_SENSORS_CODE: i8 = -1;

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum DetectorError {
    #[error("Insufficient sensors: need {required}, have {available}")]
    InsufficientSensors { required: usize, available: usize },
    #[error("No free pulse counter for {0}")]
    NoFreeCounter(LineId),
    #[error("Sensor registration failed: {0}")]
    Sensor(SensorError),
}

impl From<SensorError> for DetectorError {
    fn from(e: SensorError) -> Self {
        Self::Sensor(e)
    }
}

/// Owns the flow sensors of one pipe run and compares their rates.
pub struct LeakDetector<'a> {
    counters: &'a [PulseCounter],
    sensors: Vec<PulseRateSensor<'a>, MAX_FLOW_SENSORS>,
    threshold: f32,
}

impl<'a> LeakDetector<'a> {
    /// Create a detector that hands out `counters` to sensors in order.
    ///
    /// The counters usually live in a `static` so the interrupt handler can
    /// reach them.
    pub fn new(counters: &'a [PulseCounter]) -> Self {
        Self {
            counters,
            sensors: Vec::new(),
            threshold: LEAK_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Register a sensor on `line`, appended downstream of the existing ones.
    ///
    /// Returns the index of the new sensor.
    pub fn add_sensor<I>(
        &mut self,
        line: LineId,
        calibration_factor: f32,
        interrupts: &mut I,
    ) -> Result<usize, DetectorError>
    where
        I: EdgeInterrupts<'a>,
    {
        let index = self.sensors.len();
        let counter = match self.counters.get(index) {
            Some(counter) if !self.sensors.is_full() => counter,
            _ => return Err(DetectorError::NoFreeCounter(line)),
        };

        let sensor = PulseRateSensor::register(line, calibration_factor, counter, interrupts)?;
        // Capacity was checked above
        let _ = self.sensors.push(sensor);

        log::info!("LeakDetector: added flow sensor {} on {}", index, line);
        Ok(index)
    }

    /// Sample every sensor. Must run every loop iteration, whatever the mode.
    pub fn run(&mut self, now: Instant) {
        for sensor in self.sensors.iter_mut() {
            sensor.sample(now);
        }
    }

    /// Find the leaking segment, or 0 if the run is balanced.
    pub fn leak_segment(&self) -> Result<usize, DetectorError> {
        let available = self.sensors.len();
        if available < MIN_SENSORS_FOR_DETECTION {
            warn!(
                "LeakDetector: {} flow sensor(s) registered, need {} to monitor",
                available, MIN_SENSORS_FOR_DETECTION
            );
            return Err(DetectorError::InsufficientSensors {
                required: MIN_SENSORS_FOR_DETECTION,
                available,
            });
        }

        let anchor = &self.sensors[0];
        let last = available - 1;
        let mut index = last;

        while self.is_imbalanced(anchor, &self.sensors[index]) {
            index -= 1;
            if index == 0 {
                break;
            }
        }

        let segment = if index == last { 0 } else { index + 1 };
        debug!("LeakDetector: scan stopped at {}, segment {}", index, segment);
        Ok(segment)
    }

    /// [`leak_segment`](Self::leak_segment) in its telemetry form: -1 when
    /// detection is unavailable.
    pub fn leak_code(&self) -> i8 {
        match self.leak_segment() {
            Ok(segment) => i8::try_from(segment).unwrap_or(i8::MAX),
            Err(_) => INSUFFICIENT_SENSORS_CODE,
        }
    }

    /// Mean flow rate over all sensors (L/min).
    pub fn average_flow(&self) -> Result<f32, DetectorError> {
        if self.sensors.is_empty() {
            return Err(DetectorError::InsufficientSensors {
                required: 1,
                available: 0,
            });
        }

        let sum: f32 = self.sensors.iter().map(PulseRateSensor::flow_rate).sum();
        Ok(sum / self.sensors.len() as f32)
    }

    pub fn flow_rate(&self, index: usize) -> Option<f32> {
        self.sensors.get(index).map(PulseRateSensor::flow_rate)
    }

    pub fn total_volume(&self, index: usize) -> Option<f32> {
        self.sensors.get(index).map(PulseRateSensor::total_volume)
    }

    pub fn sensor_count(&self) -> usize {
        self.sensors.len()
    }

    pub fn sensors(&self) -> &[PulseRateSensor<'a>] {
        &self.sensors
    }

    /// Kept as two one-sided comparisons so NaN rates never count as
    /// imbalanced.
    fn is_imbalanced(&self, anchor: &PulseRateSensor<'_>, other: &PulseRateSensor<'_>) -> bool {
        let first = anchor.flow_rate();
        let second = other.flow_rate();
        second - self.threshold > first || first > second + self.threshold
    }
}
