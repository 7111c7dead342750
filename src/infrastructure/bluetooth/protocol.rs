//! Chessnut Move Protocol
//!
//! BLE identifiers, frame tags and fixed command payloads for the Chessnut
//! Move robotic board. The byte layouts were reverse engineered from the
//! official app.

/// Board-state service (one notify characteristic)
pub const FEN_SERVICE_UUID: &str = "1b7e8261-2877-41c3-b46e-cf057c562023";
pub const FEN_NOTIFY_UUID: &str = "1b7e8262-2877-41c3-b46e-cf057c562023";

/// Command service (one write, one notify characteristic)
pub const COMMAND_SERVICE_UUID: &str = "1b7e8271-2877-41c3-b46e-cf057c562023";
pub const COMMAND_WRITE_UUID: &str = "1b7e8272-2877-41c3-b46e-cf057c562023";
pub const COMMAND_NOTIFY_UUID: &str = "1b7e8273-2877-41c3-b46e-cf057c562023";

/// Tags of frames sent by the board
pub mod message_type {
    pub const BOARD_STATE: u8 = 0x01;
    pub const BATTERY_LEVEL: u8 = 0x2A;
    pub const COMMAND_RESPONSE: u8 = 0x41;
}

/// Tags of frames sent to the board
pub mod command_type {
    pub const CONFIG: u8 = 0x0B;
    pub const BUZZER_ENABLE: u8 = 0x1B;
    pub const KEEPALIVE: u8 = 0x21;
    pub const CONTROL: u8 = 0x41;
    pub const SYNC: u8 = 0x42;
    pub const LED: u8 = 0x43;
}

/// Subtype byte of CONTROL requests and COMMAND_RESPONSE frames.
///
/// Only firmware version, piece state and power level are acted upon; the
/// WiFi, pairing and firmware-update subtypes are listed for completeness.
pub mod command_subtype {
    pub const WIFI_IP: u8 = 0x01;
    pub const CONNECT_WIFI_RESULT: u8 = 0x05;
    pub const FIRMWARE_VERSION: u8 = 0x09;
    pub const FW_UPDATE_RESULT: u8 = 0x0A;
    pub const MOVE_PIECE_STATE: u8 = 0x0B;
    pub const POWER_LEVEL: u8 = 0x0C;
    pub const PAIR_MODE_ENABLE: u8 = 0x0F;
    pub const START_PAIRING: u8 = 0x10;
    pub const PAIR_MODE_DISABLE: u8 = 0x11;
    pub const BOARD_CHANNEL: u8 = 0x13;
    pub const SET_BOARD_CHANNEL: u8 = 0x14;
    pub const CAR_CHANNEL_ON_BOARD: u8 = 0x19;
    pub const BOARD_CHANNEL_SETTINGS: u8 = 0x1B;
    pub const WIFI_SSID: u8 = 0x1C;
    pub const WIFI_SWITCH_STATE: u8 = 0x1F;
    pub const SHUTDOWN_CHANNEL: u8 = 0x20;
    pub const BLE_FW_UPDATE_PROGRESS: u8 = 0x22;
    pub const BLE_FW_UPDATE_RESULT: u8 = 0x23;
}

/// Length marker (byte 1) of each nibble-packed frame
pub const SYNC_LENGTH_MARKER: u8 = 0x21;
pub const LED_LENGTH_MARKER: u8 = 0x20;
pub const BOARD_STATE_LENGTH_MARKER: u8 = 0x24;

pub const BOARD_STATE_LENGTH: usize = 38;
pub const SET_MOVE_BOARD_LENGTH: usize = 35;
pub const LED_COMMAND_LENGTH: usize = 34;
pub const MOVE_PIECE_STATE_LENGTH: usize = 139;

/// Sent first after subscribing; also serves as keepalive
pub const INIT_COMMAND: [u8; 3] = [command_type::KEEPALIVE, 0x01, 0x00];
/// Sent after INIT; the app reuses this payload as the buzzer beep
pub const CONFIG_COMMAND: [u8; 6] = [command_type::CONFIG, 0x04, 0x03, 0xE8, 0x00, 0xC8];

/// Handshake pauses
pub const INIT_DELAY_MS: u64 = 500;
pub const CONFIG_DELAY_MS: u64 = 200;
/// Pause between the two notification subscriptions
pub const SUBSCRIBE_SETTLE_MS: u64 = 200;

/// Nibble value for a FEN piece character (0 for empty or unknown).
///
/// The ordering is the board's own and does not follow any chess convention.
pub fn piece_to_nibble(piece: char) -> u8 {
    match piece {
        'q' => 1,
        'k' => 2,
        'b' => 3,
        'p' => 4,
        'n' => 5,
        'R' => 6,
        'P' => 7,
        'r' => 8,
        'B' => 9,
        'N' => 10,
        'Q' => 11,
        'K' => 12,
        _ => 0,
    }
}

/// FEN piece character for a nibble, `None` for empty or unknown values.
pub fn nibble_to_piece(value: u8) -> Option<char> {
    match value {
        1 => Some('q'),
        2 => Some('k'),
        3 => Some('b'),
        4 => Some('p'),
        5 => Some('n'),
        6 => Some('R'),
        7 => Some('P'),
        8 => Some('r'),
        9 => Some('B'),
        10 => Some('N'),
        11 => Some('Q'),
        12 => Some('K'),
        _ => None,
    }
}

/// Device names advertised by Chessnut boards
pub fn is_chessnut_name(name: &str, patterns: &[String]) -> bool {
    let name = name.to_lowercase();
    !name.is_empty()
        && patterns
            .iter()
            .any(|pattern| name.contains(&pattern.to_lowercase()))
}
