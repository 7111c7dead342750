use thiserror::Error;

/// Failures while parsing or normalizing a FEN string.
///
/// These are raised before any bytes reach the board.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FenError {
    #[error("invalid FEN: {0}")]
    InvalidFen(String),

    #[error("malformed board field: {0}")]
    MalformedBoard(String),

    #[error("invalid side to move: {0}")]
    InvalidTurn(String),

    #[error("invalid castling rights: {0}")]
    InvalidCastling(String),

    #[error("invalid en passant square: {0}")]
    InvalidEnPassant(String),

    #[error("invalid move counter: {0}")]
    InvalidCounter(String),
}

/// Link-level failures. Always recoverable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,

    #[error("no matching device found")]
    NoDevice,

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("platform error: {0}")]
    Platform(String),

    #[error("link setup failed: {0}")]
    Setup(String),
}

pub type TransportResult<T> = Result<T, TransportError>;
