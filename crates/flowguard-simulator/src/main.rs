//! Desktop simulator for the flowguard water-leak monitor.
//!
//! Runs flowguard-core's control loop on the host against simulated
//! hardware: three flow sensors fed by a pulse generator thread, a
//! configuration radio with a scripted phone client, a Wi-Fi station that
//! associates after a short delay and a telemetry socket that logs what it
//! would send.
//!
//! Credentials are kept in a storage image on disk between runs. Without
//! stored credentials (or with `--provision`) the simulator boots into
//! configuration mode, lets the phone provision `FLOWGUARD_SSID` /
//! `FLOWGUARD_PASS` and then flips the mode switch back to normal.
//!
//! | Variable              | Default              | When       |
//! |-----------------------|----------------------|------------|
//! | `FLOWGUARD_DEVICE_ID` | `sim`                | build time |
//! | `FLOWGUARD_WS_HOST`   | `192.168.137.1`      | build time |
//! | `FLOWGUARD_WS_PORT`   | `8040`               | build time |
//! | `FLOWGUARD_WS_PATH`   | `/`                  | build time |
//! | `FLOWGUARD_SSID`      | `SimNet`             | run time   |
//! | `FLOWGUARD_PASS`      | `simulated-passphrase` | run time |
//! | `FLOWGUARD_STORAGE`   | `flowguard-nvs.bin`  | run time   |
//! | `FLOWGUARD_RUN_SECS`  | `60`                 | run time   |

use std::convert::Infallible;
use std::env;
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration as StdDuration;

use embassy_sync::channel::TrySendError;
use embassy_time::{Delay, Duration, Instant};
use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
use log::{debug, error, info, warn};

use flowguard_core::config::{
    DEFAULT_CALIBRATION_FACTOR, DeviceConfig, PARTITION_LIMIT, STORAGE_NAMESPACE, TelemetryConfig,
    WifiCredentials,
};
use flowguard_core::network::WifiStation;
use flowguard_core::provisioning::{
    ConfigAttribute, ConfigEvent, ConfigEventQueue, ConfigRadio, load_credentials,
};
use flowguard_core::sensors::{EdgeInterrupts, LineId, PulseCounter, SensorError};
use flowguard_core::storage::{MemoryBackend, PartitionedStore};
use flowguard_core::telemetry::TelemetryLink;
use flowguard_core::{App, Hardware, Platform};

// ---------------------------------------------------------------------------
// Build-time settings
// ---------------------------------------------------------------------------

const DEVICE_ID: &str = match option_env!("FLOWGUARD_DEVICE_ID") {
    Some(id) => id,
    None => "sim",
};

const WS_HOST: &str = match option_env!("FLOWGUARD_WS_HOST") {
    Some(host) => host,
    None => "192.168.137.1",
};

const WS_PATH: &str = match option_env!("FLOWGUARD_WS_PATH") {
    Some(path) => path,
    None => "/",
};

// ---------------------------------------------------------------------------
// Simulation constants
// ---------------------------------------------------------------------------

/// GPIO lines of the sensors, upstream first.
const SENSOR_LINES: [u8; 3] = [27, 14, 12];

const SENSOR_COUNT: usize = SENSOR_LINES.len();

/// Normal household flow through every sensor (L/min).
const BASE_FLOW: f32 = 12.0;

/// Flow reaching the last sensor while the simulated pipe leaks (L/min).
const LEAK_FLOW: f32 = 0.5;

/// Seconds after start during which the pipe between sensor 1 and 2 leaks.
const LEAK_WINDOW: (f32, f32) = (30.0, 45.0);

const PULSE_TICK: StdDuration = StdDuration::from_millis(5);

const LOOP_PERIOD: StdDuration = StdDuration::from_millis(10);

/// Time the simulated station takes to associate.
const WIFI_ASSOCIATION_TIME: Duration = Duration::from_secs(3);

/// Characters per radio write sent by the scripted phone.
const PHONE_CHUNK_CHARS: usize = 8;

// ---------------------------------------------------------------------------
// Interrupt-shared state
// ---------------------------------------------------------------------------

static COUNTERS: [PulseCounter; SENSOR_COUNT] =
    [PulseCounter::new(), PulseCounter::new(), PulseCounter::new()];

static EVENTS: ConfigEventQueue = ConfigEventQueue::new();

/// Mode selector level (high = configuration).
static CONFIG_SWITCH: AtomicBool = AtomicBool::new(false);

// ---------------------------------------------------------------------------
// Pulse generation
// ---------------------------------------------------------------------------

fn scenario_flows(elapsed_secs: f32) -> [f32; SENSOR_COUNT] {
    let mut flows = [BASE_FLOW; SENSOR_COUNT];
    if (LEAK_WINDOW.0..LEAK_WINDOW.1).contains(&elapsed_secs) {
        flows[SENSOR_COUNT - 1] = LEAK_FLOW;
    }
    flows
}

/// Plays the role of the GPIO interrupt handlers.
fn spawn_pulse_generator(running: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let start = std::time::Instant::now();
        let mut owed = [0f32; SENSOR_COUNT];

        while running.load(Ordering::Relaxed) {
            let flows = scenario_flows(start.elapsed().as_secs_f32());
            for (index, flow) in flows.iter().enumerate() {
                owed[index] += flow * DEFAULT_CALIBRATION_FACTOR * PULSE_TICK.as_secs_f32();
                while owed[index] >= 1.0 {
                    COUNTERS[index].record_edge();
                    owed[index] -= 1.0;
                }
            }
            thread::sleep(PULSE_TICK);
        }
    })
}

struct SimInterrupts;

impl<'a> EdgeInterrupts<'a> for SimInterrupts {
    fn attach(&mut self, line: LineId, _counter: &'a PulseCounter) -> Result<(), SensorError> {
        debug!("Sim: pulse generator wired to {}", line);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Simulated peripherals
// ---------------------------------------------------------------------------

struct SimSelector;

impl ErrorType for SimSelector {
    type Error = Infallible;
}

impl InputPin for SimSelector {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(CONFIG_SWITCH.load(Ordering::Acquire))
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!CONFIG_SWITCH.load(Ordering::Acquire))
    }
}

struct SimLed {
    name: &'static str,
    on: bool,
}

impl SimLed {
    fn new(name: &'static str) -> Self {
        Self { name, on: false }
    }

    fn set(&mut self, on: bool) {
        if self.on != on {
            debug!("Sim: {} LED {}", self.name, if on { "on" } else { "off" });
        }
        self.on = on;
    }
}

impl ErrorType for SimLed {
    type Error = Infallible;
}

impl OutputPin for SimLed {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.set(true);
        Ok(())
    }
}

/// Configuration radio. Starting it brings a scripted phone into range.
struct SimRadio {
    phone_script: Option<WifiCredentials>,
}

impl ConfigRadio for SimRadio {
    type Error = Infallible;

    fn start(&mut self, device_name: &str) -> Result<(), Self::Error> {
        info!("Sim: advertising configuration service as '{}'", device_name);
        if let Some(credentials) = self.phone_script.take() {
            spawn_phone(credentials);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Self::Error> {
        info!("Sim: configuration radio off");
        Ok(())
    }

    fn notify_status(&mut self, status: &str) {
        info!("Sim: phone notified '{}'", status);
    }
}

/// Queue one radio event, waiting while the main loop catches up.
fn radio_callback(mut event: ConfigEvent) {
    loop {
        match EVENTS.try_send(event) {
            Ok(()) => return,
            Err(TrySendError::Full(rejected)) => {
                event = rejected;
                thread::sleep(LOOP_PERIOD);
            }
        }
    }
}

fn send_value(attribute: ConfigAttribute, value: &str) {
    let chars: Vec<char> = value.chars().collect();
    let chunks = chars.chunks(PHONE_CHUNK_CHARS).map(|c| c.iter().collect::<String>());

    for payload in std::iter::once("[".to_owned())
        .chain(chunks)
        .chain(std::iter::once("]".to_owned()))
    {
        match ConfigEvent::write(attribute, &payload) {
            Some(event) => radio_callback(event),
            None => warn!("Sim: phone chunk '{}' exceeds one radio write", payload),
        }
        thread::sleep(StdDuration::from_millis(50));
    }
}

/// Phone that connects, writes both credentials and has the user flip the
/// switch back to normal mode.
fn spawn_phone(credentials: WifiCredentials) {
    thread::spawn(move || {
        thread::sleep(StdDuration::from_secs(1));
        radio_callback(ConfigEvent::Connected);
        send_value(ConfigAttribute::Ssid, &credentials.ssid);
        send_value(ConfigAttribute::Secret, &credentials.password);
        radio_callback(ConfigEvent::Disconnected);

        thread::sleep(StdDuration::from_secs(1));
        info!("Sim: mode switch -> normal");
        CONFIG_SWITCH.store(false, Ordering::Release);
    });
}

#[derive(Default)]
struct SimWifi {
    joined_at: Option<Instant>,
}

impl WifiStation for SimWifi {
    type Error = Infallible;

    fn begin(&mut self, credentials: &WifiCredentials) -> Result<(), Self::Error> {
        info!("Sim: associating with '{}'", credentials.ssid);
        self.joined_at = Some(Instant::now());
        Ok(())
    }

    fn disconnect(&mut self) {
        self.joined_at = None;
    }

    fn is_connected(&self) -> bool {
        self.joined_at
            .is_some_and(|at| at.elapsed() >= WIFI_ASSOCIATION_TIME)
    }
}

#[derive(Default)]
struct SimLink {
    connected: bool,
    polls: u64,
}

impl TelemetryLink for SimLink {
    type Error = Infallible;

    fn connect(&mut self, host: &str, port: u16, path: &str) -> Result<(), Self::Error> {
        info!("Sim: websocket open to ws://{}:{}{}", host, port, path);
        self.connected = true;
        Ok(())
    }

    fn send(&mut self, text: &str) -> bool {
        info!("Sim: websocket <- {}", text);
        self.connected
    }

    fn poll(&mut self) {
        self.polls += 1;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

struct Simulator;

impl Platform for Simulator {
    type Backend = MemoryBackend;
    type Radio = SimRadio;
    type Wifi = SimWifi;
    type Link = SimLink;
    type Selector = SimSelector;
    type Led = SimLed;
    type Delay = Delay;
}

// ---------------------------------------------------------------------------
// Storage image
// ---------------------------------------------------------------------------

fn load_storage(path: &str) -> MemoryBackend {
    let fresh = || MemoryBackend::with_record_limit(PARTITION_LIMIT);
    match fs::read(path) {
        Ok(bytes) => match MemoryBackend::from_image(&bytes) {
            Ok(storage) => {
                info!("Sim: loaded '{}' ({} records) from {}", STORAGE_NAMESPACE, storage.len(), path);
                storage
            }
            Err(e) => {
                warn!("Sim: {} is not a storage image ({}), starting empty", path, e);
                fresh()
            }
        },
        Err(_) => {
            info!("Sim: no storage image at {}, starting empty", path);
            fresh()
        }
    }
}

fn save_storage(path: &str, storage: &MemoryBackend) {
    match storage.to_image() {
        Ok(image) => match fs::write(path, image) {
            Ok(()) => info!("Sim: storage saved to {}", path),
            Err(e) => error!("Sim: failed to write {}: {}", path, e),
        },
        Err(e) => error!("Sim: {}", e),
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn env_or(var: &str, default: &str) -> String {
    env::var(var).unwrap_or_else(|_| default.to_owned())
}

fn main() {
    env_logger::init();
    info!("Starting flowguard simulator as device '{}'", DEVICE_ID);

    let storage_path = env_or("FLOWGUARD_STORAGE", "flowguard-nvs.bin");
    let run_secs: u64 = env_or("FLOWGUARD_RUN_SECS", "60").parse().unwrap_or(60);
    let ws_port: u16 = option_env!("FLOWGUARD_WS_PORT")
        .and_then(|port| port.parse().ok())
        .unwrap_or(8040);

    let mut storage = load_storage(&storage_path);
    let stored = load_credentials(&PartitionedStore::new(&mut storage));
    let provision = !stored.is_complete() || env::args().any(|arg| arg == "--provision");

    let phone_script = provision.then(|| WifiCredentials {
        ssid: env_or("FLOWGUARD_SSID", "SimNet"),
        password: env_or("FLOWGUARD_PASS", "simulated-passphrase"),
    });
    CONFIG_SWITCH.store(provision, Ordering::Release);

    let config = DeviceConfig {
        device_id: DEVICE_ID,
        telemetry: TelemetryConfig {
            host: WS_HOST,
            port: ws_port,
            path: WS_PATH,
        },
        ..Default::default()
    };

    let hardware = Hardware::<Simulator> {
        storage,
        radio: SimRadio { phone_script },
        wifi: SimWifi::default(),
        link: SimLink::default(),
        selector: SimSelector,
        wifi_led: SimLed::new("wifi"),
        config_led: SimLed::new("config"),
        delay: Delay,
    };

    let mut app = App::new(config, &COUNTERS, &EVENTS, hardware);
    for line in SENSOR_LINES {
        if let Err(e) = app.state.add_sensor(LineId(line), &mut SimInterrupts) {
            error!("Sim: {}", e);
            return;
        }
    }

    let running = Arc::new(AtomicBool::new(true));
    let generator = spawn_pulse_generator(running.clone());

    let deadline = Instant::now() + Duration::from_secs(run_secs);
    app.boot(Instant::now());
    while Instant::now() < deadline {
        app.step(Instant::now());
        thread::sleep(LOOP_PERIOD);
    }

    running.store(false, Ordering::Relaxed);
    if generator.join().is_err() {
        warn!("Sim: pulse generator panicked");
    }

    for (index, sensor) in app.state.detector.sensors().iter().enumerate() {
        info!(
            "Sim: sensor {} on {} measured {:.2} L in total",
            index,
            sensor.line(),
            sensor.total_volume()
        );
    }
    info!("Sim: telemetry link polled {} times", app.state.link.polls);
    save_storage(&storage_path, app.state.store.backend());
}
