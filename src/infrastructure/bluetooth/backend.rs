//! Platform BLE seam
//!
//! A backend owns the platform handles for one peripheral. The transport
//! drives it through this trait and never touches platform types directly.

use crate::domain::error::TransportResult;
use crate::domain::models::DeviceInfo;
use crate::infrastructure::bluetooth::transport::NotificationRouter;
use async_trait::async_trait;
use std::time::Duration;

/// The two notify characteristics exposed by the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyChannel {
    /// FEN service notify characteristic: board state and battery frames
    BoardState,
    /// Command service notify characteristic: command responses
    CommandResponse,
}

#[async_trait]
pub trait BleBackend: Send + Sync + 'static {
    /// Discover nearby named peripherals for `timeout`.
    async fn scan(&self, timeout: Duration) -> TransportResult<Vec<DeviceInfo>>;

    /// Open the link and resolve both services. Notifications and link loss
    /// must be reported through `router` from the platform's callback context.
    async fn connect(&self, device: &DeviceInfo, router: NotificationRouter) -> TransportResult<()>;

    async fn request_mtu(&self, mtu: u16) -> TransportResult<()>;

    async fn subscribe(&self, channel: NotifyChannel) -> TransportResult<()>;

    /// Write to the command characteristic.
    async fn write(&self, data: &[u8], with_response: bool) -> TransportResult<()>;

    async fn disconnect(&self) -> TransportResult<()>;

    fn is_connected(&self) -> bool;
}
