//! Hardware seams the application is generic over
//!
//! A board support crate (or the simulator) picks one concrete type per seam
//! by implementing [`Platform`] and hands the instances over in a
//! [`Hardware`] container at startup.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

use crate::network::WifiStation;
use crate::provisioning::ConfigRadio;
use crate::storage::KvBackend;
use crate::telemetry::TelemetryLink;

pub trait Platform {
    /// Persistent key-value store the credentials live in.
    type Backend: KvBackend;
    type Radio: ConfigRadio;
    type Wifi: WifiStation;
    type Link: TelemetryLink;
    /// Mode selector switch (high = Configuration).
    type Selector: InputPin;
    type Led: OutputPin;
    type Delay: DelayNs;
}

/// Container for the peripherals the application owns
pub struct Hardware<P: Platform> {
    pub storage: P::Backend,
    pub radio: P::Radio,
    pub wifi: P::Wifi,
    pub link: P::Link,
    pub selector: P::Selector,
    pub wifi_led: P::Led,
    pub config_led: P::Led,
    pub delay: P::Delay,
}
