//! Application-wide state and error types for FlowGuard

mod hardware;

pub use hardware::*;

use embassy_time::Instant;
use embedded_hal::digital::OutputPin;
use log::{debug, error, info, warn};
use thiserror_no_std::Error;

use crate::config::DeviceConfig;
use crate::leak::{DetectorError, LeakDetector};
use crate::mode::{DeviceMode, ModeActions, ModeController};
use crate::network::{ConnectivityMonitor, LinkChange, WifiStation};
use crate::provisioning::{load_credentials, ConfigEventQueue, ProvisioningError, WirelessConfigChannel};
use crate::sensors::{EdgeInterrupts, LineId, PulseCounter};
use crate::storage::{PartitionedStore, StoreError};
use crate::telemetry::{wait_until, FlowReport, TelemetryLink, TelemetryReporter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppRunState {
    Uninitialized,
    /// Configuration mode, radio advertising.
    Configuring,
    /// Normal mode without stored credentials.
    Unconfigured,
    WifiConnecting,
    WifiConnected,
    Error,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
    #[error("Leak detector error: {0}")]
    Detector(DetectorError),
    #[error("Provisioning error: {0}")]
    Provisioning(ProvisioningError),
    #[error("Storage error: {0}")]
    Storage(StoreError),
    #[error("WiFi connection failed")]
    Wifi,
    #[error("Telemetry link failed")]
    Link,
}

impl From<DetectorError> for AppError {
    fn from(e: DetectorError) -> Self {
        Self::Detector(e)
    }
}

impl From<ProvisioningError> for AppError {
    fn from(e: ProvisioningError) -> Self {
        Self::Provisioning(e)
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        Self::Storage(e)
    }
}

/// Main application state container
///
/// Owns every component of the device and implements what happens on mode
/// edges and in each loop iteration. The selector itself lives in the
/// [`ModeController`] of the surrounding [`App`].
pub struct AppState<'a, P: Platform> {
    pub run_state: AppRunState,
    pub config: DeviceConfig<'a>,
    pub detector: LeakDetector<'a>,
    pub store: PartitionedStore<P::Backend>,
    pub channel: WirelessConfigChannel<P::Radio>,
    pub events: &'a ConfigEventQueue,
    pub wifi: P::Wifi,
    pub link: P::Link,
    pub connectivity: ConnectivityMonitor<P::Led>,
    pub config_led: P::Led,
    pub delay: P::Delay,
    pub reporter: TelemetryReporter,
}

impl<'a, P: Platform> AppState<'a, P> {
    /// Assemble the application from its parts. Returns the state and the
    /// mode selector, which belongs to the [`ModeController`].
    pub fn new(
        config: DeviceConfig<'a>,
        counters: &'a [PulseCounter],
        events: &'a ConfigEventQueue,
        hardware: Hardware<P>,
    ) -> (Self, P::Selector) {
        let Hardware {
            storage,
            radio,
            wifi,
            link,
            selector,
            wifi_led,
            config_led,
            delay,
        } = hardware;

        let state = Self {
            run_state: AppRunState::Uninitialized,
            detector: LeakDetector::new(counters),
            store: PartitionedStore::new(storage),
            channel: WirelessConfigChannel::new(radio, config.device_id),
            events,
            wifi,
            link,
            connectivity: ConnectivityMonitor::new(wifi_led, config.wifi_blink_interval()),
            config_led,
            delay,
            reporter: TelemetryReporter::new(config.report_interval()),
            config,
        };
        (state, selector)
    }

    /// Register the next flow sensor along the pipe with the configured
    /// calibration factor.
    pub fn add_sensor<I: EdgeInterrupts<'a>>(
        &mut self,
        line: LineId,
        interrupts: &mut I,
    ) -> Result<usize, AppError> {
        let index = self
            .detector
            .add_sensor(line, self.config.calibration_factor, interrupts)?;
        info!("App: flow sensor {} registered on {}", index, line);
        Ok(index)
    }

    /// Current detector readings as reported to the server.
    pub fn flow_report(&self) -> FlowReport {
        FlowReport {
            average_flow: self.detector.average_flow().ok(),
            leak_code: self.detector.leak_code(),
        }
    }

    fn start_configuration(&mut self) -> Result<(), AppError> {
        if matches!(
            self.run_state,
            AppRunState::WifiConnecting | AppRunState::WifiConnected
        ) {
            info!("App: leaving WiFi for configuration");
            self.wifi.disconnect();
        }
        self.run_state = AppRunState::Configuring;
        self.set_config_led(true);
        self.connectivity.reset();
        self.channel.discard_queued(self.events);
        self.channel.start()?;
        Ok(())
    }

    fn start_normal(&mut self) -> Result<(), AppError> {
        if self.channel.is_active() {
            // Writes received before the switch moved still count
            let committed = self.channel.drain(self.events, &mut self.store);
            if committed > 0 {
                info!("App: {} credential(s) updated", committed);
            }
            self.channel.stop()?;
        }
        self.set_config_led(false);

        let credentials = load_credentials(&self.store);
        if !credentials.is_complete() {
            warn!("App: no WiFi configuration stored");
            self.run_state = AppRunState::Unconfigured;
            return Ok(());
        }

        info!("App: connecting to WiFi '{}'", credentials.ssid);
        self.wifi.begin(&credentials).map_err(|e| {
            error!("App: WiFi start failed: {:?}", e);
            AppError::Wifi
        })?;
        self.run_state = AppRunState::WifiConnecting;
        Ok(())
    }

    fn check_connectivity(&mut self, now: Instant) {
        match self.connectivity.update(now, self.wifi.is_connected()) {
            LinkChange::Connected => {
                self.run_state = AppRunState::WifiConnected;
                if let Err(e) = self.connect_link() {
                    warn!("App: {}", e);
                }
            }
            LinkChange::Disconnected => self.run_state = AppRunState::WifiConnecting,
            LinkChange::Unchanged => {}
        }
    }

    /// Open the telemetry link once the network is up.
    fn connect_link(&mut self) -> Result<(), AppError> {
        let wifi = &self.wifi;
        let retries = wait_until(&mut self.delay, self.config.link_retry_ms, || {
            wifi.is_connected()
        });
        if retries > 0 {
            debug!("App: network ready after {} retries", retries);
        }

        let endpoint = &self.config.telemetry;
        info!(
            "App: connecting telemetry to {}:{}{}",
            endpoint.host, endpoint.port, endpoint.path
        );
        self.link
            .connect(endpoint.host, endpoint.port, endpoint.path)
            .map_err(|e| {
                error!("App: telemetry connect failed: {:?}", e);
                AppError::Link
            })?;

        // New session, so the server gets the current values again
        self.reporter.reset();
        Ok(())
    }

    fn report(&mut self, now: Instant) {
        let report = self.flow_report();
        if self.connectivity.is_connected() {
            self.reporter.report(now, report, &mut self.link);
        } else {
            self.reporter.skip(now, report);
        }
    }

    fn set_config_led(&mut self, on: bool) {
        let result = if on {
            self.config_led.set_high()
        } else {
            self.config_led.set_low()
        };
        if let Err(e) = result {
            warn!("App: failed to drive configuration LED: {:?}", e);
        }
    }
}

impl<P: Platform> ModeActions for AppState<'_, P> {
    fn enter_configuration(&mut self, _now: Instant) {
        if let Err(e) = self.start_configuration() {
            error!("App: {}", e);
            self.run_state = AppRunState::Error;
        }
    }

    fn enter_normal(&mut self, _now: Instant) {
        if let Err(e) = self.start_normal() {
            error!("App: {}", e);
            self.run_state = AppRunState::Error;
        }
    }

    fn normal_iteration(&mut self, now: Instant) {
        if self.connectivity.is_connected() {
            self.link.poll();
        }

        if self.reporter.is_due(now) {
            debug!("App: checking water leakage");
            self.report(now);
        }

        self.check_connectivity(now);
    }

    fn configuration_iteration(&mut self, _now: Instant) {
        let committed = self.channel.drain(self.events, &mut self.store);
        if committed > 0 {
            info!("App: {} credential(s) updated", committed);
        }
    }
}

/// The whole device: mode controller plus application state.
pub struct App<'a, P: Platform> {
    pub controller: ModeController<P::Selector>,
    pub state: AppState<'a, P>,
}

impl<'a, P: Platform> App<'a, P> {
    pub fn new(
        config: DeviceConfig<'a>,
        counters: &'a [PulseCounter],
        events: &'a ConfigEventQueue,
        hardware: Hardware<P>,
    ) -> Self {
        let (state, selector) = AppState::new(config, counters, events, hardware);
        Self {
            controller: ModeController::new(selector),
            state,
        }
    }

    /// Enter the mode selected at power-on.
    pub fn boot(&mut self, now: Instant) -> DeviceMode {
        self.controller.boot(&mut self.state, now)
    }

    /// One control loop iteration. Sensors are sampled in either mode.
    pub fn step(&mut self, now: Instant) -> DeviceMode {
        self.state.detector.run(now);
        self.controller.poll(&mut self.state, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioning::{ConfigAttribute, ConfigEvent};
    use crate::storage::MemoryBackend;
    use crate::test_support::{
        CountingDelay, MockLed, MockLink, MockRadio, MockWifi, RecordingInterrupts, ScriptedPin,
    };

    struct TestPlatform;

    impl Platform for TestPlatform {
        type Backend = MemoryBackend;
        type Radio = MockRadio;
        type Wifi = MockWifi;
        type Link = MockLink;
        type Selector = ScriptedPin;
        type Led = MockLed;
        type Delay = CountingDelay;
    }

    fn hardware(selector: &[bool], storage: MemoryBackend) -> Hardware<TestPlatform> {
        Hardware {
            storage,
            radio: MockRadio::default(),
            wifi: MockWifi::default(),
            link: MockLink::default(),
            selector: ScriptedPin::new(selector),
            wifi_led: MockLed::default(),
            config_led: MockLed::default(),
            delay: CountingDelay::default(),
        }
    }

    fn provisioned() -> MemoryBackend {
        let mut store = PartitionedStore::new(MemoryBackend::new());
        store.put("wifi-ssid", "HomeNet").unwrap();
        store.put("wifi-pass", "correct horse").unwrap();
        store.into_backend()
    }

    fn pulse(counter: &PulseCounter, edges: u32) {
        for _ in 0..edges {
            counter.record_edge();
        }
    }

    fn write(queue: &ConfigEventQueue, attribute: ConfigAttribute, payloads: &[&str]) {
        for payload in payloads {
            queue
                .try_send(ConfigEvent::write(attribute, payload).unwrap())
                .unwrap();
        }
    }

    #[test]
    fn normal_boot_without_credentials_is_unconfigured() {
        let counters: [PulseCounter; 2] = Default::default();
        let queue = ConfigEventQueue::new();
        let mut app = App::new(
            DeviceConfig::default(),
            &counters,
            &queue,
            hardware(&[false], MemoryBackend::new()),
        );

        assert_eq!(app.boot(Instant::from_secs(0)), DeviceMode::Normal);

        assert_eq!(app.state.run_state, AppRunState::Unconfigured);
        assert!(app.state.wifi.joined.is_empty());
    }

    #[test]
    fn normal_boot_joins_stored_network() {
        let counters: [PulseCounter; 2] = Default::default();
        let queue = ConfigEventQueue::new();
        let mut app = App::new(
            DeviceConfig::default(),
            &counters,
            &queue,
            hardware(&[false], provisioned()),
        );

        app.boot(Instant::from_secs(0));

        assert_eq!(app.state.run_state, AppRunState::WifiConnecting);
        assert_eq!(app.state.wifi.joined.len(), 1);
        assert_eq!(app.state.wifi.joined[0].ssid, "HomeNet");
        assert_eq!(app.state.wifi.joined[0].password, "correct horse");
    }

    #[test]
    fn provisioning_then_returning_to_normal_joins_network() {
        let counters: [PulseCounter; 2] = Default::default();
        let queue = ConfigEventQueue::new();
        let config = DeviceConfig {
            device_id: "17",
            ..Default::default()
        };
        let mut app = App::new(
            config,
            &counters,
            &queue,
            hardware(&[true, true, false], MemoryBackend::new()),
        );

        assert_eq!(app.boot(Instant::from_secs(0)), DeviceMode::Configuration);
        assert_eq!(app.state.run_state, AppRunState::Configuring);
        assert!(app.state.config_led.is_high);
        assert_eq!(
            app.state.channel.radio().advertised_as.as_deref(),
            Some("ESP32-17")
        );

        queue.try_send(ConfigEvent::Connected).unwrap();
        write(&queue, ConfigAttribute::Ssid, &["[", "Home", "Net", "]"]);
        write(&queue, ConfigAttribute::Secret, &["[", "s3cr3t", "]"]);
        app.step(Instant::from_secs(1));

        assert_eq!(app.state.store.get("wifi-ssid"), "HomeNet");
        assert_eq!(app.state.channel.status(), "pass:saved");

        assert_eq!(app.step(Instant::from_secs(2)), DeviceMode::Normal);

        assert_eq!(app.state.channel.radio().stopped, 1);
        assert!(!app.state.channel.is_active());
        assert!(!app.state.config_led.is_high);
        assert_eq!(app.state.run_state, AppRunState::WifiConnecting);
        assert_eq!(app.state.wifi.joined[0].ssid, "HomeNet");
        assert_eq!(app.state.wifi.joined[0].password, "s3cr3t");
    }

    #[test]
    fn connection_edge_opens_telemetry_link_once() {
        let counters: [PulseCounter; 2] = Default::default();
        let queue = ConfigEventQueue::new();
        let mut app = App::new(
            DeviceConfig::default(),
            &counters,
            &queue,
            hardware(&[false], provisioned()),
        );
        app.boot(Instant::from_secs(0));

        app.step(Instant::from_secs(1));
        assert!(app.state.link.endpoints.is_empty());

        app.state.wifi.connected = true;
        app.step(Instant::from_secs(2));
        app.step(Instant::from_secs(3));

        assert_eq!(app.state.run_state, AppRunState::WifiConnected);
        assert_eq!(app.state.link.endpoints, ["192.168.137.1:8040/"]);
        assert_eq!(app.state.link.polls, 1);
        assert!(app.state.connectivity.led_on());
    }

    #[test]
    fn readings_are_reported_when_they_change() {
        let counters: [PulseCounter; 2] = Default::default();
        let queue = ConfigEventQueue::new();
        let config = DeviceConfig {
            calibration_factor: 1.0,
            ..Default::default()
        };
        let mut app = App::new(config, &counters, &queue, hardware(&[false], provisioned()));
        let mut irq = RecordingInterrupts::default();
        app.state.add_sensor(LineId(27), &mut irq).unwrap();
        app.state.add_sensor(LineId(14), &mut irq).unwrap();
        app.boot(Instant::from_secs(0));
        app.state.wifi.connected = true;

        // First report goes out before the connection edge is seen
        app.step(Instant::from_secs(1));
        assert!(app.state.link.sent.is_empty());

        pulse(&counters[0], 60);
        pulse(&counters[1], 60);
        app.step(Instant::from_secs(7));
        assert_eq!(app.state.link.sent, ["aflow=10.00", "leak=0"]);

        // Upstream sensor sees four times the downstream flow
        pulse(&counters[0], 240);
        pulse(&counters[1], 60);
        app.step(Instant::from_secs(13));
        assert_eq!(
            app.state.link.sent,
            ["aflow=10.00", "leak=0", "aflow=25.00", "leak=1"]
        );
    }

    #[test]
    fn sensors_are_sampled_in_configuration_mode() {
        let counters: [PulseCounter; 1] = Default::default();
        let queue = ConfigEventQueue::new();
        let config = DeviceConfig {
            calibration_factor: 1.0,
            ..Default::default()
        };
        let mut app = App::new(
            config,
            &counters,
            &queue,
            hardware(&[true], MemoryBackend::new()),
        );
        let mut irq = RecordingInterrupts::default();
        app.state.add_sensor(LineId(27), &mut irq).unwrap();
        app.boot(Instant::from_secs(0));

        pulse(&counters[0], 30);
        app.step(Instant::from_secs(1));

        assert_eq!(app.state.detector.flow_rate(0), Some(30.0));
        assert!(app.state.link.sent.is_empty());
    }

    #[test]
    fn writes_queued_before_switch_to_normal_are_committed() {
        let counters: [PulseCounter; 1] = Default::default();
        let queue = ConfigEventQueue::new();
        let mut app = App::new(
            DeviceConfig::default(),
            &counters,
            &queue,
            hardware(&[true, false, true], MemoryBackend::new()),
        );
        app.boot(Instant::from_secs(0));

        write(&queue, ConfigAttribute::Ssid, &["[", "HomeNet", "]"]);
        write(&queue, ConfigAttribute::Secret, &["[", "s3cr3t", "]"]);
        assert_eq!(app.step(Instant::from_secs(1)), DeviceMode::Normal);

        assert_eq!(app.state.store.get("wifi-ssid"), "HomeNet");
        assert_eq!(
            app.state.channel.radio().notifications,
            ["ssid:saved", "pass:saved"]
        );
        assert_eq!(app.state.run_state, AppRunState::WifiConnecting);
        assert_eq!(app.state.wifi.joined[0].ssid, "HomeNet");
        assert!(queue.try_receive().is_err());

        // Re-entering configuration finds nothing left to commit
        assert_eq!(app.step(Instant::from_secs(2)), DeviceMode::Configuration);
        assert_eq!(app.state.channel.radio().notifications.len(), 2);
    }

    #[test]
    fn events_from_an_earlier_session_are_discarded() {
        let counters: [PulseCounter; 1] = Default::default();
        let queue = ConfigEventQueue::new();
        let mut app = App::new(
            DeviceConfig::default(),
            &counters,
            &queue,
            hardware(&[false, true], MemoryBackend::new()),
        );
        app.boot(Instant::from_secs(0));

        // Late callback from a radio that is already off
        write(&queue, ConfigAttribute::Ssid, &["[", "Stale", "]"]);
        assert_eq!(app.step(Instant::from_secs(1)), DeviceMode::Configuration);
        app.step(Instant::from_secs(2));

        assert_eq!(app.state.store.get("wifi-ssid"), "");
        assert!(app.state.channel.radio().notifications.is_empty());
    }

    #[test]
    fn entering_configuration_leaves_the_network() {
        let counters: [PulseCounter; 1] = Default::default();
        let queue = ConfigEventQueue::new();
        let mut app = App::new(
            DeviceConfig::default(),
            &counters,
            &queue,
            hardware(&[false, true], provisioned()),
        );
        app.boot(Instant::from_secs(0));
        assert_eq!(app.state.run_state, AppRunState::WifiConnecting);
        app.state.wifi.connected = true;

        assert_eq!(app.step(Instant::from_secs(1)), DeviceMode::Configuration);

        assert_eq!(app.state.wifi.disconnects, 1);
        assert!(!app.state.wifi.connected);
        assert_eq!(app.state.run_state, AppRunState::Configuring);
    }

    #[test]
    fn radio_failure_marks_error_state() {
        let counters: [PulseCounter; 1] = Default::default();
        let queue = ConfigEventQueue::new();
        let mut hw = hardware(&[true], MemoryBackend::new());
        hw.radio.fail_start = true;
        let mut app = App::new(DeviceConfig::default(), &counters, &queue, hw);

        app.boot(Instant::from_secs(0));

        assert_eq!(app.state.run_state, AppRunState::Error);
    }
}
