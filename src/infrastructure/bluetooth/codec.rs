//! Frame Codec
//!
//! Pure encode/decode functions for every Chessnut Move frame kind. Nothing
//! here performs I/O or holds state.
//!
//! # Nibble-packed board layout
//!
//! Board (SYNC), LED and board-state frames carry 64 squares in 32 bytes
//! starting at offset 2. Each byte holds two horizontally adjacent squares:
//!
//! ```text
//! byte[row * 4 + (3 - pair) + 2] = (left << 4) | right
//!     row  : 0 = rank 8 .. 7 = rank 1
//!     pair : 0 = files a/b .. 3 = files g/h
//! ```
//!
//! Column pairs are stored in reverse order within each row's 4-byte group.
//! The board misreads every frame if this is changed.
//!
//! Decoders return `None` when a frame is not of their kind so callers can
//! try them in order on a shared notification channel.

use crate::domain::error::FenError;
use crate::domain::models::{
    BoardState, LedColor, PiecePosition, PieceTable, PowerLevel, DEFAULT_FEN_TAIL,
    NUM_ROBOTIC_PIECES,
};
use crate::infrastructure::bluetooth::protocol::{
    self, command_subtype, command_type, message_type, BOARD_STATE_LENGTH,
    BOARD_STATE_LENGTH_MARKER, CONFIG_COMMAND, LED_COMMAND_LENGTH, LED_LENGTH_MARKER,
    MOVE_PIECE_STATE_LENGTH, SET_MOVE_BOARD_LENGTH, SYNC_LENGTH_MARKER,
};

/// `grid[row][col]`, row 0 = rank 8, col 0 = a-file
pub type BoardGrid = [[Option<char>; 8]; 8];

/// Offset of the first packed byte in nibble-packed frames
const PACKED_OFFSET: usize = 2;

/// Expand a (possibly partial) FEN to its six-field form.
pub fn normalize_fen(fen: &str) -> Result<String, FenError> {
    let parts: Vec<&str> = fen.split_whitespace().collect();
    match parts.len() {
        0 => Err(FenError::InvalidFen("empty FEN".to_string())),
        1 => Ok(format!("{} {}", parts[0], DEFAULT_FEN_TAIL)),
        2 => Ok(format!("{} {} KQkq - 0 1", parts[0], parts[1])),
        3 => Ok(format!("{} - 0 1", parts[..3].join(" "))),
        4 => Ok(format!("{} 0 1", parts[..4].join(" "))),
        5 => Ok(format!("{} 1", parts[..5].join(" "))),
        6 => Ok(fen.to_string()),
        n => Err(FenError::InvalidFen(format!("{} fields", n))),
    }
}

/// The placement field of a FEN.
pub fn board_only(fen: &str) -> Result<&str, FenError> {
    fen.split_whitespace()
        .next()
        .ok_or_else(|| FenError::InvalidFen("empty FEN".to_string()))
}

/// Lay the placement field of `fen` out on an 8x8 grid.
pub fn fen_to_board(fen: &str) -> Result<BoardGrid, FenError> {
    let placement = board_only(fen)?;
    let mut grid: BoardGrid = [[None; 8]; 8];
    let mut row = 0usize;
    let mut col = 0usize;

    for c in placement.chars() {
        if let Some(skip) = c.to_digit(10) {
            col += skip as usize;
        } else if c == '/' {
            row += 1;
            col = 0;
        } else {
            if row >= 8 || col >= 8 {
                return Err(FenError::MalformedBoard(format!(
                    "'{}' lands outside the board",
                    c
                )));
            }
            grid[row][col] = Some(c);
            col += 1;
        }
    }

    if row != 7 || col != 8 {
        return Err(FenError::MalformedBoard(format!(
            "placement ends at row {}, column {}",
            row, col
        )));
    }
    Ok(grid)
}

/// Pack 64 nibbles (row-major, row 0 = rank 8) into `frame[2..34]`.
fn pack_nibbles(values: &[u8; 64], frame: &mut [u8]) {
    for row in 0..8 {
        for pair in 0..4 {
            let col = pair * 2;
            let left = values[row * 8 + col] & 0x0F;
            let right = values[row * 8 + col + 1] & 0x0F;
            frame[row * 4 + (3 - pair) + PACKED_OFFSET] = (left << 4) | right;
        }
    }
}

/// Encode a SYNC frame that tells the board to set up `fen`.
///
/// `force` makes the pieces move immediately (byte 34 = 0).
pub fn encode_set_position(fen: &str, force: bool) -> Result<[u8; SET_MOVE_BOARD_LENGTH], FenError> {
    let grid = fen_to_board(fen)?;

    let mut values = [0u8; 64];
    for (row, rank) in grid.iter().enumerate() {
        for (col, square) in rank.iter().enumerate() {
            values[row * 8 + col] = square.map(protocol::piece_to_nibble).unwrap_or(0);
        }
    }

    let mut frame = [0u8; SET_MOVE_BOARD_LENGTH];
    frame[0] = command_type::SYNC;
    frame[1] = SYNC_LENGTH_MARKER;
    pack_nibbles(&values, &mut frame);
    frame[34] = if force { 0 } else { 1 };
    Ok(frame)
}

/// Encode an LED frame from a full 64-square color map.
pub fn encode_led_frame(leds: &[LedColor; 64]) -> [u8; LED_COMMAND_LENGTH] {
    let mut values = [0u8; 64];
    for (value, color) in values.iter_mut().zip(leds.iter()) {
        *value = *color as u8;
    }

    let mut frame = [0u8; LED_COMMAND_LENGTH];
    frame[0] = command_type::LED;
    frame[1] = LED_LENGTH_MARKER;
    pack_nibbles(&values, &mut frame);
    frame
}

/// Light `(row, col)` squares in `color`; out-of-range squares are ignored.
pub fn encode_led_command<I>(squares: I, color: LedColor) -> [u8; LED_COMMAND_LENGTH]
where
    I: IntoIterator<Item = (usize, usize)>,
{
    let mut leds = [LedColor::Off; 64];
    for (row, col) in squares {
        if row < 8 && col < 8 {
            leds[row * 8 + col] = color;
        }
    }
    encode_led_frame(&leds)
}

/// Light algebraic squares (`"e4"`) in `color`; unparseable names are ignored.
pub fn encode_led_command_from_squares<I, S>(squares: I, color: LedColor) -> [u8; LED_COMMAND_LENGTH]
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let coords: Vec<(usize, usize)> = squares
        .into_iter()
        .filter_map(|square| square_to_coords(square.as_ref()))
        .collect();
    encode_led_command(coords, color)
}

/// `"e2"` -> `(row 6, col 4)`
fn square_to_coords(square: &str) -> Option<(usize, usize)> {
    let mut chars = square.chars();
    let file = chars.next()?.to_ascii_lowercase();
    let rank = chars.next()?.to_digit(10)? as usize;
    if !('a'..='h').contains(&file) || !(1..=8).contains(&rank) {
        return None;
    }
    let col = file as usize - 'a' as usize;
    let row = 7 - (rank - 1);
    Some((row, col))
}

pub fn encode_clear_leds() -> [u8; LED_COMMAND_LENGTH] {
    encode_led_frame(&[LedColor::Off; 64])
}

/// The app reuses the CONFIG payload as a beep.
pub fn encode_buzzer_beep() -> [u8; 6] {
    CONFIG_COMMAND
}

pub fn encode_buzzer_enable(enable: bool) -> [u8; 3] {
    [command_type::BUZZER_ENABLE, 0x01, u8::from(enable)]
}

pub fn encode_get_power_level() -> [u8; 3] {
    [command_type::CONTROL, 0x01, command_subtype::POWER_LEVEL]
}

pub fn encode_get_firmware_version() -> [u8; 3] {
    [command_type::CONTROL, 0x01, command_subtype::FIRMWARE_VERSION]
}

pub fn encode_get_move_piece_state() -> [u8; 3] {
    [command_type::CONTROL, 0x01, command_subtype::MOVE_PIECE_STATE]
}

/// Decode a board-state notification into a board-only FEN.
pub fn decode_board_state(data: &[u8]) -> Option<BoardState> {
    if data.len() < BOARD_STATE_LENGTH {
        return None;
    }
    if data[0] != message_type::BOARD_STATE || data[1] != BOARD_STATE_LENGTH_MARKER {
        return None;
    }

    let mut ranks = Vec::with_capacity(8);
    for row in 0..8 {
        let mut rank = String::new();
        let mut empty = 0u8;

        // Walking the nibbles backwards yields files a..h.
        for col in (0..8).rev() {
            let byte = data[(row * 8 + col) / 2 + PACKED_OFFSET];
            let nibble = if col % 2 == 0 { byte & 0x0F } else { byte >> 4 };

            match protocol::nibble_to_piece(nibble) {
                Some(piece) => {
                    if empty > 0 {
                        rank.push(char::from(b'0' + empty));
                        empty = 0;
                    }
                    rank.push(piece);
                }
                None => empty += 1,
            }
        }
        if empty > 0 {
            rank.push(char::from(b'0' + empty));
        }
        ranks.push(rank);
    }

    Some(BoardState {
        fen_board: ranks.join("/"),
        raw_data: data.to_vec(),
    })
}

pub fn decode_battery_level(data: &[u8]) -> Option<u8> {
    if data.len() < 3 || data[0] != message_type::BATTERY_LEVEL {
        return None;
    }
    Some(data[2])
}

fn is_command_response(data: &[u8], subtype: u8) -> bool {
    data[0] == message_type::COMMAND_RESPONSE && data[2] == subtype
}

pub fn decode_power_level(data: &[u8]) -> Option<PowerLevel> {
    if data.len() < 5 || !is_command_response(data, command_subtype::POWER_LEVEL) {
        return None;
    }
    Some(PowerLevel {
        charging: data[3] == 1,
        percentage: data[4],
    })
}

/// Byte 1 counts the subtype byte plus the version string.
pub fn decode_firmware_version(data: &[u8]) -> Option<String> {
    if data.len() < 4 || !is_command_response(data, command_subtype::FIRMWARE_VERSION) {
        return None;
    }
    let length = usize::from(data[1]).saturating_sub(1);
    let payload = data.get(3..3 + length)?;
    let version = std::str::from_utf8(payload).ok()?;
    Some(version.trim_matches('\0').to_string())
}

/// 34 slots of `[x, y, battery, _]` after a 4-byte header.
pub fn decode_move_piece_state(data: &[u8]) -> Option<PieceTable> {
    if data.len() < MOVE_PIECE_STATE_LENGTH
        || !is_command_response(data, command_subtype::MOVE_PIECE_STATE)
    {
        return None;
    }

    let mut table = [PiecePosition::default(); NUM_ROBOTIC_PIECES];
    for (idx, slot) in table.iter_mut().enumerate() {
        let offset = idx * 4 + 4;
        *slot = PiecePosition {
            x: data[offset],
            y: data[offset + 1],
            battery: data[offset + 2],
        };
    }
    Some(table)
}
