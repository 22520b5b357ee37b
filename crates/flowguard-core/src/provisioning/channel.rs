use core::fmt::Write;

use heapless::String as HString;
use log::{debug, error, info, warn};

use super::{
    ConfigAttribute, ConfigEvent, ConfigEventQueue, ConfigRadio, PendingWriteBuffer,
    ProvisioningError, WriteOutcome,
};
use crate::config::WifiCredentials;
use crate::storage::{KvBackend, PartitionedStore};

/// Prefix of the advertised radio name.
pub const DEVICE_NAME_PREFIX: &str = "ESP32-";

pub const MAX_DEVICE_NAME_LEN: usize = 29;

pub const MAX_STATUS_LEN: usize = 20;

pub type DeviceName = HString<MAX_DEVICE_NAME_LEN>;

/// Wireless configuration service.
///
/// Owns the radio while active and one [`PendingWriteBuffer`] per writable
/// attribute, so transfers to the SSID and the secret never mix.
pub struct WirelessConfigChannel<R> {
    radio: R,
    device_name: DeviceName,
    ssid: PendingWriteBuffer,
    secret: PendingWriteBuffer,
    status: HString<MAX_STATUS_LEN>,
    active: bool,
    client_connected: bool,
}

impl<R: ConfigRadio> WirelessConfigChannel<R> {
    /// Create an inactive channel advertising as `ESP32-<device_id>`.
    ///
    /// Overlong ids are truncated to fit the advertisement.
    pub fn new(radio: R, device_id: &str) -> Self {
        let mut device_name = DeviceName::new();
        let _ = device_name.push_str(DEVICE_NAME_PREFIX);
        for c in device_id.chars() {
            if device_name.push(c).is_err() {
                warn!("Provisioning: device id '{}' truncated in radio name", device_id);
                break;
            }
        }

        Self {
            radio,
            device_name,
            ssid: PendingWriteBuffer::new(),
            secret: PendingWriteBuffer::new(),
            status: HString::new(),
            active: false,
            client_connected: false,
        }
    }

    /// Start advertising the configuration service.
    ///
    /// Both transfer buffers start empty.
    pub fn start(&mut self) -> Result<(), ProvisioningError> {
        if self.active {
            return Err(ProvisioningError::AlreadyActive);
        }

        info!("Provisioning: starting radio as '{}'", self.device_name);
        self.radio.start(&self.device_name).map_err(|e| {
            error!("Provisioning: radio failed to start: {:?}", e);
            ProvisioningError::Radio
        })?;

        self.ssid.clear();
        self.secret.clear();
        self.active = true;
        info!("Provisioning: advertising started");
        Ok(())
    }

    /// Stop advertising and release the radio.
    pub fn stop(&mut self) -> Result<(), ProvisioningError> {
        if !self.active {
            return Err(ProvisioningError::NotActive);
        }

        self.radio.stop().map_err(|e| {
            error!("Provisioning: radio failed to stop: {:?}", e);
            ProvisioningError::Radio
        })?;

        self.active = false;
        self.client_connected = false;
        info!("Provisioning: radio stopped");
        Ok(())
    }

    /// Process one radio event to completion.
    ///
    /// Returns the attribute whose value was committed, if any.
    pub fn handle_event<B: KvBackend>(
        &mut self,
        event: ConfigEvent,
        store: &mut PartitionedStore<B>,
    ) -> Result<Option<ConfigAttribute>, ProvisioningError> {
        match event {
            ConfigEvent::Connected => {
                info!("Provisioning: client connected");
                self.client_connected = true;
                Ok(None)
            }
            ConfigEvent::Disconnected => {
                info!("Provisioning: client disconnected");
                self.client_connected = false;
                Ok(None)
            }
            ConfigEvent::Write { attribute, payload } => self.on_write(attribute, &payload, store),
        }
    }

    /// Handle every event currently waiting in `queue`.
    ///
    /// A failed commit is reported to the client through the status
    /// attribute and does not stop the remaining events from being handled.
    /// Returns how many values were committed.
    pub fn drain<B: KvBackend>(
        &mut self,
        queue: &ConfigEventQueue,
        store: &mut PartitionedStore<B>,
    ) -> usize {
        let mut committed = 0;
        while let Ok(event) = queue.try_receive() {
            match self.handle_event(event, store) {
                Ok(Some(_)) => committed += 1,
                Ok(None) => {}
                Err(e) => error!("Provisioning: {}", e),
            }
        }
        committed
    }

    /// Drop events left in `queue` by an earlier session.
    pub fn discard_queued(&self, queue: &ConfigEventQueue) -> usize {
        let mut discarded = 0;
        while queue.try_receive().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            warn!("Provisioning: discarded {} stale radio event(s)", discarded);
        }
        discarded
    }

    /// Feed one attribute write into its buffer, persisting on commit.
    pub fn on_write<B: KvBackend>(
        &mut self,
        attribute: ConfigAttribute,
        payload: &str,
        store: &mut PartitionedStore<B>,
    ) -> Result<Option<ConfigAttribute>, ProvisioningError> {
        let outcome = match attribute {
            ConfigAttribute::Ssid => self.ssid.feed(payload),
            ConfigAttribute::Secret => self.secret.feed(payload),
        };

        match outcome {
            WriteOutcome::Started => {
                debug!("Provisioning: {} transfer started", attribute.label());
                Ok(None)
            }
            WriteOutcome::Appended => {
                debug!("Provisioning: {} chunk of {} bytes", attribute.label(), payload.len());
                Ok(None)
            }
            WriteOutcome::Committed(value) => {
                info!("Provisioning: saving new {}...", attribute.label());
                if let Err(e) = store.put(attribute.storage_key(), &value) {
                    self.publish_status(attribute, "error");
                    return Err(e.into());
                }
                info!("Provisioning: new {} saved", attribute.label());
                self.publish_status(attribute, "saved");
                Ok(Some(attribute))
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_client_connected(&self) -> bool {
        self.client_connected
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Last value published on the status attribute.
    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn pending(&self, attribute: ConfigAttribute) -> &PendingWriteBuffer {
        match attribute {
            ConfigAttribute::Ssid => &self.ssid,
            ConfigAttribute::Secret => &self.secret,
        }
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    fn publish_status(&mut self, attribute: ConfigAttribute, state: &str) {
        self.status.clear();
        let _ = write!(self.status, "{}:{}", attribute.label(), state);
        self.radio.notify_status(&self.status);
    }
}

/// Read the provisioned credentials; unset fields come back empty.
pub fn load_credentials<B: KvBackend>(store: &PartitionedStore<B>) -> WifiCredentials {
    WifiCredentials {
        ssid: store.get(ConfigAttribute::Ssid.storage_key()),
        password: store.get(ConfigAttribute::Secret.storage_key()),
    }
}
