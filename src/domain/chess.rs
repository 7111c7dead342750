//! Chess Rules Collaborator
//!
//! The driver only needs to know that a FEN describes a well-formed position
//! before it is pushed to the board. Full move legality is not modelled here;
//! the [`ChessRules`] trait is the seam where a complete rules engine plugs in.

use crate::domain::error::FenError;
use serde::{Deserialize, Serialize};
use std::fmt;

const PIECE_CHARS: &str = "pnbrqkPNBRQK";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Color {
    White,
    Black,
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::White => write!(f, "w"),
            Color::Black => write!(f, "b"),
        }
    }
}

/// A parsed position. `squares[0]` is rank 8, `squares[_][0]` is the a-file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    squares: [[Option<char>; 8]; 8],
    turn: Color,
    castling: String,
    en_passant: Option<String>,
    halfmove_clock: u32,
    fullmove_number: u32,
}

impl Position {
    /// Piece on `(row, col)`, row 0 = rank 8.
    pub fn piece_at(&self, row: usize, col: usize) -> Option<char> {
        self.squares.get(row)?.get(col).copied().flatten()
    }

    pub fn turn(&self) -> Color {
        self.turn
    }

    /// Piece placement field only
    pub fn board_fen(&self) -> String {
        let mut ranks = Vec::with_capacity(8);
        for row in &self.squares {
            let mut rank = String::new();
            let mut empty = 0;
            for square in row {
                match square {
                    Some(piece) => {
                        if empty > 0 {
                            rank.push_str(&empty.to_string());
                            empty = 0;
                        }
                        rank.push(*piece);
                    }
                    None => empty += 1,
                }
            }
            if empty > 0 {
                rank.push_str(&empty.to_string());
            }
            ranks.push(rank);
        }
        ranks.join("/")
    }

    /// Full six-field FEN
    pub fn fen(&self) -> String {
        format!(
            "{} {} {} {} {} {}",
            self.board_fen(),
            self.turn,
            self.castling,
            self.en_passant.as_deref().unwrap_or("-"),
            self.halfmove_clock,
            self.fullmove_number
        )
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fen())
    }
}

/// Chess-rules collaborator used to vet positions before they are sent.
pub trait ChessRules: Send + Sync {
    fn parse_fen(&self, fen: &str) -> Result<Position, FenError>;
}

/// Structural FEN parser: placement, side to move, castling, en passant and
/// counters. Missing trailing fields take their standard defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct FenRules;

impl ChessRules for FenRules {
    fn parse_fen(&self, fen: &str) -> Result<Position, FenError> {
        let fields: Vec<&str> = fen.split_whitespace().collect();
        if fields.is_empty() || fields.len() > 6 {
            return Err(FenError::InvalidFen(fen.to_string()));
        }

        let squares = parse_placement(fields[0])?;

        let turn = match fields.get(1).copied().unwrap_or("w") {
            "w" => Color::White,
            "b" => Color::Black,
            other => return Err(FenError::InvalidTurn(other.to_string())),
        };

        let castling = fields.get(2).copied().unwrap_or("-");
        if castling != "-"
            && !castling
                .chars()
                .all(|c| matches!(c, 'K' | 'Q' | 'k' | 'q' | 'A'..='H' | 'a'..='h'))
        {
            return Err(FenError::InvalidCastling(castling.to_string()));
        }

        let en_passant = match fields.get(3).copied().unwrap_or("-") {
            "-" => None,
            square => {
                let bytes = square.as_bytes();
                if bytes.len() != 2
                    || !(b'a'..=b'h').contains(&bytes[0])
                    || !matches!(bytes[1], b'3' | b'6')
                {
                    return Err(FenError::InvalidEnPassant(square.to_string()));
                }
                Some(square.to_string())
            }
        };

        let halfmove_clock = parse_counter(fields.get(4).copied().unwrap_or("0"))?;
        let fullmove_number = parse_counter(fields.get(5).copied().unwrap_or("1"))?;

        Ok(Position {
            squares,
            turn,
            castling: castling.to_string(),
            en_passant,
            halfmove_clock,
            fullmove_number,
        })
    }
}

fn parse_placement(field: &str) -> Result<[[Option<char>; 8]; 8], FenError> {
    let ranks: Vec<&str> = field.split('/').collect();
    if ranks.len() != 8 {
        return Err(FenError::MalformedBoard(format!(
            "expected 8 ranks, found {}",
            ranks.len()
        )));
    }

    let mut squares = [[None; 8]; 8];
    for (row, rank) in ranks.iter().enumerate() {
        let mut col = 0usize;
        let mut previous_was_digit = false;
        for c in rank.chars() {
            if let Some(skip) = c.to_digit(10) {
                if skip == 0 || skip > 8 || previous_was_digit {
                    return Err(FenError::MalformedBoard(format!("bad rank '{}'", rank)));
                }
                col += skip as usize;
                previous_was_digit = true;
            } else if PIECE_CHARS.contains(c) {
                if col >= 8 {
                    return Err(FenError::MalformedBoard(format!("rank '{}' too long", rank)));
                }
                squares[row][col] = Some(c);
                col += 1;
                previous_was_digit = false;
            } else {
                return Err(FenError::MalformedBoard(format!("unexpected '{}'", c)));
            }
        }
        if col != 8 {
            return Err(FenError::MalformedBoard(format!(
                "rank '{}' covers {} squares",
                rank, col
            )));
        }
    }
    Ok(squares)
}

fn parse_counter(value: &str) -> Result<u32, FenError> {
    value
        .parse::<u32>()
        .map_err(|_| FenError::InvalidCounter(value.to_string()))
}
