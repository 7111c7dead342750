use crate::domain::chess::Position;
use serde::{Deserialize, Serialize};

/// Number of robotic piece slots reported by the board.
pub const NUM_ROBOTIC_PIECES: usize = 34;

/// Side-to-move and counters appended to a board-only FEN.
pub const DEFAULT_FEN_TAIL: &str = "w KQkq - 0 1";

/// A board found while scanning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    /// Platform address (MAC string, or hex-formatted WinRT address)
    pub address: String,
}

/// Lifecycle of the single physical link
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkPhase {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

/// Link-level state owned by the transport
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub connected: bool,
    pub phase: LinkPhase,
    pub device_name: Option<String>,
    pub device_address: Option<String>,
    pub firmware_version: Option<String>,
    pub battery_level: Option<u8>,
}

/// A decoded board-state notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardState {
    pub fen_board: String,
    pub raw_data: Vec<u8>,
}

impl BoardState {
    /// Board-only FEN with the default tail appended.
    pub fn full_fen(&self) -> String {
        format!("{} {}", self.fen_board, DEFAULT_FEN_TAIL)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiecePosition {
    pub x: u8,
    pub y: u8,
    pub battery: u8,
}

/// The fixed robotic-piece table. Always exactly 34 slots; replaced whole.
pub type PieceTable = [PiecePosition; NUM_ROBOTIC_PIECES];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerLevel {
    pub charging: bool,
    pub percentage: u8,
}

/// LED colors understood by the board
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum LedColor {
    #[default]
    Off = 0,
    Red = 1,
    Green = 2,
    Blue = 3,
}

/// Read-only projection of connection, telemetry and cached position.
///
/// Recomputed on every query, never mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverStatus {
    pub connected: bool,
    pub phase: LinkPhase,
    pub device_name: Option<String>,
    pub device_address: Option<String>,
    pub firmware_version: Option<String>,
    pub battery_level: Option<u8>,
    pub is_charging: Option<bool>,
    pub position: Option<Position>,
    pub fen: Option<String>,
}
