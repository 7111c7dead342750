//! BLE Transport
//!
//! Owns exactly one physical link to a Chessnut board and turns backend
//! callbacks into two raw-byte listener registries.

use crate::domain::error::{TransportError, TransportResult};
use crate::domain::models::{ConnectionState, DeviceInfo, LinkPhase};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::backend::{BleBackend, NotifyChannel};
use crate::infrastructure::bluetooth::protocol::{
    self, message_type, CONFIG_COMMAND, CONFIG_DELAY_MS, INIT_COMMAND, INIT_DELAY_MS,
    SUBSCRIBE_SETTLE_MS,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Extra time granted on top of the scan window before giving up on the
/// platform.
const SCAN_GRACE: Duration = Duration::from_secs(2);

/// Raw notification listener
pub type RawListener = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Configuration for link behavior
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub scan_timeout: Duration,
    pub connect_timeout: Duration,
    /// Bound on each write and on teardown
    pub write_timeout: Duration,
    pub mtu: u16,
    pub device_name_patterns: Vec<String>,
    pub subscribe_settle: Duration,
    pub init_delay: Duration,
    pub config_delay: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl TransportConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            scan_timeout: Duration::from_secs(settings.scan_timeout_secs),
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            write_timeout: Duration::from_millis(settings.write_timeout_ms),
            mtu: settings.mtu,
            device_name_patterns: settings.device_name_patterns.clone(),
            subscribe_settle: Duration::from_millis(SUBSCRIBE_SETTLE_MS),
            init_delay: Duration::from_millis(INIT_DELAY_MS),
            config_delay: Duration::from_millis(CONFIG_DELAY_MS),
        }
    }
}

#[derive(Default)]
struct TransportShared {
    state: Mutex<ConnectionState>,
    /// Bumped on every connect and disconnect so callbacks from an old link
    /// are ignored.
    generation: AtomicU64,
    board_listeners: RwLock<Vec<RawListener>>,
    command_listeners: RwLock<Vec<RawListener>>,
}

impl TransportShared {
    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listeners(&self, channel: NotifyChannel) -> Vec<RawListener> {
        let registry = match channel {
            NotifyChannel::BoardState => &self.board_listeners,
            NotifyChannel::CommandResponse => &self.command_listeners,
        };
        registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Handle through which a backend reports notifications and link loss.
///
/// Bound to one link; once that link is replaced or torn down every call
/// becomes a no-op.
#[derive(Clone)]
pub struct NotificationRouter {
    shared: Arc<TransportShared>,
    generation: u64,
}

impl NotificationRouter {
    fn is_current(&self) -> bool {
        self.shared.generation.load(Ordering::SeqCst) == self.generation
    }

    /// Deliver one notification. Runs on the platform callback context and
    /// never blocks on link management.
    pub fn deliver(&self, channel: NotifyChannel, data: &[u8]) {
        if data.is_empty() || !self.is_current() {
            return;
        }
        trace!("{:?} notification: {:02X?}", channel, data);

        match channel {
            NotifyChannel::BoardState => match data[0] {
                message_type::BOARD_STATE => self.forward(channel, data),
                message_type::BATTERY_LEVEL if data.len() >= 3 => {
                    debug!("Battery level: {}%", data[2]);
                    self.shared.state().battery_level = Some(data[2]);
                }
                tag => debug!("Dropping board-channel frame with tag {:#04X}", tag),
            },
            NotifyChannel::CommandResponse => self.forward(channel, data),
        }
    }

    fn forward(&self, channel: NotifyChannel, data: &[u8]) {
        for listener in self.shared.listeners(channel) {
            listener(data);
        }
    }

    /// The platform reported a spontaneous disconnect.
    pub fn link_lost(&self) {
        if !self.is_current() {
            return;
        }
        warn!("Device disconnected");
        let mut state = self.shared.state();
        state.connected = false;
        state.phase = LinkPhase::Idle;
    }
}

pub struct BleTransport<B: BleBackend> {
    backend: B,
    config: TransportConfig,
    shared: Arc<TransportShared>,
}

impl<B: BleBackend> BleTransport<B> {
    pub fn new(backend: B, config: TransportConfig) -> Self {
        Self {
            backend,
            config,
            shared: Arc::new(TransportShared::default()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Snapshot of the link state
    pub fn state(&self) -> ConnectionState {
        self.shared.state().clone()
    }

    pub fn phase(&self) -> LinkPhase {
        self.shared.state().phase
    }

    pub fn is_connected(&self) -> bool {
        let linked = {
            let state = self.shared.state();
            state.connected && state.phase == LinkPhase::Connected
        };
        linked && self.backend.is_connected()
    }

    pub fn on_board_state(&self, listener: RawListener) {
        self.shared
            .board_listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn on_command_response(&self, listener: RawListener) {
        self.shared
            .command_listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Discover nearby Chessnut boards.
    pub async fn scan(&self, timeout: Duration) -> TransportResult<Vec<DeviceInfo>> {
        info!("Scanning for Chessnut devices ({:?})...", timeout);
        let devices = tokio::time::timeout(timeout + SCAN_GRACE, self.backend.scan(timeout))
            .await
            .map_err(|_| TransportError::Timeout("scan"))??;

        let matches: Vec<DeviceInfo> = devices
            .into_iter()
            .filter(|d| protocol::is_chessnut_name(&d.name, &self.config.device_name_patterns))
            .collect();
        for device in &matches {
            info!("Found device: {} ({})", device.name, device.address);
        }
        Ok(matches)
    }

    /// Connect to `device`, or to the first board found by scanning.
    ///
    /// Any existing link is torn down first. Link open, MTU, subscriptions
    /// and handshake share one `connect_timeout` deadline; a failure or
    /// timeout at any step rolls the link back completely.
    pub async fn connect(&self, device: Option<DeviceInfo>) -> bool {
        if self.phase() != LinkPhase::Idle || self.backend.is_connected() {
            self.disconnect().await;
        }

        let device = match self.resolve_device(device).await {
            Ok(device) => device,
            Err(e) => {
                error!("Device lookup failed: {}", e);
                return false;
            }
        };

        let setup = tokio::time::timeout(self.config.connect_timeout, self.open_link(&device))
            .await
            .unwrap_or(Err(TransportError::Timeout("connect")));

        match setup {
            Ok(()) => {
                info!("Connected to {} ({})", device.name, device.address);
                true
            }
            Err(e) => {
                error!("Connection to {} failed: {}", device.address, e);
                self.disconnect().await;
                false
            }
        }
    }

    /// The given device, else the first board found by scanning.
    async fn resolve_device(&self, device: Option<DeviceInfo>) -> TransportResult<DeviceInfo> {
        if let Some(device) = device {
            return Ok(device);
        }
        self.scan(self.config.scan_timeout)
            .await?
            .into_iter()
            .next()
            .ok_or(TransportError::NoDevice)
    }

    async fn open_link(&self, device: &DeviceInfo) -> TransportResult<()> {
        let router = {
            let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let mut state = self.shared.state();
            state.phase = LinkPhase::Connecting;
            state.device_name = Some(device.name.clone());
            state.device_address = Some(device.address.clone());
            NotificationRouter {
                shared: self.shared.clone(),
                generation,
            }
        };

        info!("Connecting to {} ({})...", device.name, device.address);
        self.backend.connect(device, router).await?;

        if let Err(e) = self.backend.request_mtu(self.config.mtu).await {
            debug!("MTU request failed: {}", e);
        } else {
            debug!("Requested MTU: {}", self.config.mtu);
        }

        self.backend.subscribe(NotifyChannel::BoardState).await?;
        tokio::time::sleep(self.config.subscribe_settle).await;
        self.backend.subscribe(NotifyChannel::CommandResponse).await?;

        self.write(&INIT_COMMAND, true).await?;
        tokio::time::sleep(self.config.init_delay).await;
        self.write(&CONFIG_COMMAND, true).await?;
        tokio::time::sleep(self.config.config_delay).await;

        if !self.backend.is_connected() {
            return Err(TransportError::Setup("link dropped during handshake".to_string()));
        }

        let mut state = self.shared.state();
        state.connected = true;
        state.phase = LinkPhase::Connected;
        Ok(())
    }

    async fn write(&self, data: &[u8], with_response: bool) -> TransportResult<()> {
        trace!("Writing {:02X?}", data);
        tokio::time::timeout(
            self.config.write_timeout,
            self.backend.write(data, with_response),
        )
        .await
        .map_err(|_| TransportError::Timeout("write"))?
    }

    /// Write a frame to the command characteristic.
    pub async fn send(&self, data: &[u8], wait_for_ack: bool) -> bool {
        if !self.is_connected() {
            error!("Not connected");
            return false;
        }
        match self.write(data, wait_for_ack).await {
            Ok(()) => true,
            Err(e) => {
                error!("Send command error: {}", e);
                false
            }
        }
    }

    /// Tear the link down. Local state is cleared even if the platform call
    /// fails.
    pub async fn disconnect(&self) {
        self.shared.state().phase = LinkPhase::Disconnecting;

        match tokio::time::timeout(self.config.write_timeout, self.backend.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Disconnect error: {}", e),
            Err(_) => warn!("Disconnect timed out"),
        }

        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        let mut state = self.shared.state();
        state.connected = false;
        state.phase = LinkPhase::Idle;
        info!("Disconnected");
    }
}

#[cfg(test)]
impl TransportConfig {
    /// No handshake pauses and short timeouts.
    pub(crate) fn immediate() -> Self {
        Self {
            scan_timeout: Duration::from_millis(10),
            connect_timeout: Duration::from_millis(500),
            write_timeout: Duration::from_millis(500),
            subscribe_settle: Duration::ZERO,
            init_delay: Duration::ZERO,
            config_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}
