//! Device configuration and tuning constants

use embassy_time::Duration;
use serde::{Deserialize, Serialize};

use alloc::string::String;

/// Length of one flow sampling window.
pub const SAMPLE_WINDOW: Duration = Duration::from_secs(1);

/// Flow difference (L/min) above which two sensors are considered imbalanced.
pub const LEAK_THRESHOLD: f32 = 10.0;

/// Pulses per second per L/min for the YF-S201 sensors the board ships with.
pub const DEFAULT_CALIBRATION_FACTOR: f32 = 7.5;

/// Maximum length in bytes of a single stored record before it is partitioned.
pub const PARTITION_LIMIT: usize = 10;

/// Maximum storage key length (NVS limit).
pub const MAX_KEY_LEN: usize = 15;

/// Storage key holding the provisioned Wi-Fi SSID.
pub const WIFI_SSID_KEY: &str = "wifi-ssid";

/// Storage key holding the provisioned Wi-Fi password.
pub const WIFI_PASS_KEY: &str = "wifi-pass";

/// Storage namespace the device opens at boot.
pub const STORAGE_NAMESPACE: &str = "wms-dev";

/// Maximum number of flow sensors along one pipe run.
pub const MAX_FLOW_SENSORS: usize = 8;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(bound(deserialize = "'de: 'a"))]
pub struct DeviceConfig<'a> {
    /// Suffix of the advertised radio name (`ESP32-<device_id>`).
    pub device_id: &'a str,
    pub telemetry: TelemetryConfig<'a>,
    pub calibration_factor: f32,
    /// Interval between telemetry reports in Normal mode.
    pub report_interval_ms: u64,
    /// Toggle period of the Wi-Fi indicator while disconnected.
    pub wifi_blink_interval_ms: u64,
    /// Retry delay of the "wait until link available" helper.
    pub link_retry_ms: u32,
}

impl Default for DeviceConfig<'_> {
    fn default() -> Self {
        Self {
            device_id: "0",
            telemetry: TelemetryConfig::default(),
            calibration_factor: DEFAULT_CALIBRATION_FACTOR,
            report_interval_ms: 5000,
            wifi_blink_interval_ms: 2000,
            link_retry_ms: 500,
        }
    }
}

impl DeviceConfig<'_> {
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    pub fn wifi_blink_interval(&self) -> Duration {
        Duration::from_millis(self.wifi_blink_interval_ms)
    }
}

/// Where the telemetry socket connects to once Wi-Fi is up.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TelemetryConfig<'a> {
    pub host: &'a str,
    pub port: u16,
    pub path: &'a str,
}

impl Default for TelemetryConfig<'_> {
    fn default() -> Self {
        Self {
            host: "192.168.137.1",
            port: 8040,
            path: "/",
        }
    }
}

/// Network credentials as provisioned over the configuration channel.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
}

impl WifiCredentials {
    /// Both fields must be present before a connection is attempted.
    pub fn is_complete(&self) -> bool {
        !self.ssid.is_empty() && !self.password.is_empty()
    }
}
