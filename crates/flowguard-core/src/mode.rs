//! Normal / Configuration mode switching
//!
//! A physical switch selects the device mode. The controller samples it once
//! per loop iteration and compares the reading with the mode it acted on last
//! time. Entry actions run exactly once per edge; the previous mode is only
//! updated after they return, so a reset in the middle of a transition shows
//! up as an edge again on the next boot rather than being lost.

use embassy_time::Instant;
use embedded_hal::digital::InputPin;
use log::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    /// Sensing, leak detection and telemetry.
    Normal,
    /// Credential provisioning over the radio.
    Configuration,
}

impl DeviceMode {
    /// The selector reads high for Configuration (pulled down otherwise).
    pub const fn from_level(high: bool) -> Self {
        if high {
            Self::Configuration
        } else {
            Self::Normal
        }
    }
}

/// What the device does on mode edges and on every iteration.
pub trait ModeActions {
    /// Normal → Configuration edge (and Configuration at boot).
    fn enter_configuration(&mut self, now: Instant);

    /// Configuration → Normal edge (and Normal at boot).
    fn enter_normal(&mut self, now: Instant);

    /// Loop body while in Normal mode.
    fn normal_iteration(&mut self, now: Instant);

    /// Loop body while in Configuration mode.
    fn configuration_iteration(&mut self, _now: Instant) {}
}

pub struct ModeController<S> {
    selector: S,
    previous: DeviceMode,
}

impl<S: InputPin> ModeController<S> {
    pub fn new(selector: S) -> Self {
        Self {
            selector,
            previous: DeviceMode::Normal,
        }
    }

    /// Read the selector, falling back to the last acted-on mode when the
    /// pin cannot be read.
    pub fn read_mode(&mut self) -> DeviceMode {
        match self.selector.is_high() {
            Ok(high) => DeviceMode::from_level(high),
            Err(e) => {
                warn!("Mode: selector read failed ({:?}), staying in {:?}", e, self.previous);
                self.previous
            }
        }
    }

    /// Enter whichever mode the selector shows at startup.
    pub fn boot<A: ModeActions>(&mut self, actions: &mut A, now: Instant) -> DeviceMode {
        let mode = self.read_mode();
        info!("Mode: booting into {:?}", mode);
        match mode {
            DeviceMode::Configuration => actions.enter_configuration(now),
            DeviceMode::Normal => actions.enter_normal(now),
        }
        self.previous = mode;
        mode
    }

    /// Run one loop iteration: edge actions first, then the mode's body.
    pub fn poll<A: ModeActions>(&mut self, actions: &mut A, now: Instant) -> DeviceMode {
        let mode = self.read_mode();

        match (self.previous, mode) {
            (DeviceMode::Normal, DeviceMode::Configuration) => {
                info!("Mode: entering configuration mode");
                actions.enter_configuration(now);
            }
            (DeviceMode::Configuration, DeviceMode::Normal) => {
                info!("Mode: returning to normal mode");
                actions.enter_normal(now);
            }
            _ => {}
        }
        self.previous = mode;

        match mode {
            DeviceMode::Normal => actions.normal_iteration(now),
            DeviceMode::Configuration => actions.configuration_iteration(now),
        }
        mode
    }

    /// Mode acted on by the last [`boot`](Self::boot) or [`poll`](Self::poll).
    pub fn current(&self) -> DeviceMode {
        self.previous
    }

    pub fn selector_mut(&mut self) -> &mut S {
        &mut self.selector
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedPin;

    #[derive(Default)]
    struct Recorder {
        log: Vec<(usize, &'static str)>,
        step: usize,
    }

    impl ModeActions for Recorder {
        fn enter_configuration(&mut self, _now: Instant) {
            self.log.push((self.step, "enter_configuration"));
        }

        fn enter_normal(&mut self, _now: Instant) {
            self.log.push((self.step, "enter_normal"));
        }

        fn normal_iteration(&mut self, _now: Instant) {
            self.log.push((self.step, "normal"));
        }

        fn configuration_iteration(&mut self, _now: Instant) {
            self.log.push((self.step, "configuration"));
        }
    }

    fn edges(log: &[(usize, &'static str)]) -> Vec<(usize, &'static str)> {
        log.iter()
            .copied()
            .filter(|(_, action)| action.starts_with("enter"))
            .collect()
    }

    #[test]
    fn edge_actions_fire_once_per_edge() {
        // Normal, Normal, Configuration, Configuration, Normal
        let pin = ScriptedPin::new(&[false, false, true, true, false]);
        let mut controller = ModeController::new(pin);
        let mut recorder = Recorder::default();

        for step in 1..=5 {
            recorder.step = step;
            controller.poll(&mut recorder, Instant::from_secs(step as u64));
        }

        assert_eq!(
            edges(&recorder.log),
            [(3, "enter_configuration"), (5, "enter_normal")]
        );
    }

    #[test]
    fn bodies_follow_the_selected_mode() {
        let pin = ScriptedPin::new(&[false, true, true, false]);
        let mut controller = ModeController::new(pin);
        let mut recorder = Recorder::default();

        for step in 1..=4 {
            recorder.step = step;
            controller.poll(&mut recorder, Instant::from_secs(step as u64));
        }

        let bodies: Vec<_> = recorder
            .log
            .iter()
            .copied()
            .filter(|(_, action)| !action.starts_with("enter"))
            .collect();
        assert_eq!(
            bodies,
            [(1, "normal"), (2, "configuration"), (3, "configuration"), (4, "normal")]
        );
        assert_eq!(controller.current(), DeviceMode::Normal);
    }

    #[test]
    fn edge_action_runs_before_body() {
        let pin = ScriptedPin::new(&[true]);
        let mut controller = ModeController::new(pin);
        let mut recorder = Recorder::default();

        controller.poll(&mut recorder, Instant::from_secs(1));

        assert_eq!(
            recorder.log,
            [(0, "enter_configuration"), (0, "configuration")]
        );
    }

    #[test]
    fn boot_enters_selected_mode_without_repeating_it() {
        let pin = ScriptedPin::new(&[true, true]);
        let mut controller = ModeController::new(pin);
        let mut recorder = Recorder::default();

        assert_eq!(
            controller.boot(&mut recorder, Instant::from_secs(0)),
            DeviceMode::Configuration
        );
        recorder.step = 1;
        controller.poll(&mut recorder, Instant::from_secs(1));

        assert_eq!(edges(&recorder.log), [(0, "enter_configuration")]);
    }

    #[test]
    fn boot_in_normal_runs_normal_entry() {
        let pin = ScriptedPin::new(&[false]);
        let mut controller = ModeController::new(pin);
        let mut recorder = Recorder::default();

        controller.boot(&mut recorder, Instant::from_secs(0));

        assert_eq!(recorder.log, [(0, "enter_normal")]);
    }

    #[test]
    fn unreadable_selector_keeps_current_mode() {
        let pin = ScriptedPin::new(&[true]).failing_after(1);
        let mut controller = ModeController::new(pin);
        let mut recorder = Recorder::default();

        controller.poll(&mut recorder, Instant::from_secs(1));
        controller.poll(&mut recorder, Instant::from_secs(2));

        assert_eq!(controller.current(), DeviceMode::Configuration);
        assert_eq!(edges(&recorder.log), [(0, "enter_configuration")]);
    }
}
