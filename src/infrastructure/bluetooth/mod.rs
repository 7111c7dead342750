//! Bluetooth Module
//!
//! BLE communication with the Chessnut Move board.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      BleTransport                        │
//! │   (one link: connect/handshake/send, listener routing)   │
//! └───────────────┬─────────────────────────┬───────────────┘
//!                 │                         │
//!                 ▼                         ▼
//!         ┌──────────────┐          ┌──────────────┐
//!         │  BleBackend  │          │    Codec     │
//!         │              │          │              │
//!         │ - WinRT      │          │ - SYNC / LED │
//!         │ - scan, GATT │          │ - decoders   │
//!         └──────────────┘          └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - UUIDs, frame tags and fixed commands
//! - [`codec`] - Pure frame encoders and decoders
//! - [`backend`] - Platform seam
//! - [`transport`] - Link lifecycle and notification routing

pub mod backend;
pub mod codec;
pub mod protocol;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;
#[cfg(windows)]
pub mod winrt;

pub use backend::{BleBackend, NotifyChannel};
pub use transport::{BleTransport, NotificationRouter, TransportConfig};
#[cfg(windows)]
pub use winrt::WinRtBackend;
