//! Driver for the Chessnut Move robotic chessboard over Bluetooth LE.
//!
//! - [`infrastructure::bluetooth`] speaks the board's binary protocol and owns
//!   the physical link.
//! - [`application::ChessnutDriver`] turns notifications into cached
//!   position and telemetry.
//! - [`application::DriverManager`] serializes connect/disconnect and keeps
//!   the board connected in the background.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::{AutoConnectConfig, ChessnutDriver, DriverManager};
pub use domain::chess::{ChessRules, FenRules, Position};
pub use domain::error::{FenError, TransportError};
pub use domain::models::{
    BoardState, ConnectionState, DeviceInfo, DriverStatus, LedColor, LinkPhase, PiecePosition,
    PieceTable, PowerLevel,
};
pub use infrastructure::bluetooth::{BleBackend, BleTransport, TransportConfig};
