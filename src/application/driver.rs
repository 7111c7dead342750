//! Chessnut Driver
//!
//! Domain façade over [`BleTransport`]: decodes notifications into cached
//! position and telemetry, fires position-change listeners and exposes
//! intent-level commands.

use crate::domain::chess::{ChessRules, FenRules, Position};
use crate::domain::error::FenError;
use crate::domain::models::{DeviceInfo, DriverStatus, LedColor, PieceTable};
use crate::infrastructure::bluetooth::backend::BleBackend;
use crate::infrastructure::bluetooth::codec;
use crate::infrastructure::bluetooth::transport::BleTransport;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, error, info};

/// Called with the new position whenever the board reports a different one.
pub type PositionListener = Arc<dyn Fn(&Position) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct DriverCache {
    fen: Option<String>,
    position: Option<Position>,
    firmware_version: Option<String>,
    battery_level: Option<u8>,
    is_charging: Option<bool>,
    piece_positions: Option<PieceTable>,
}

/// State mutated only from the notification path
struct DriverShared {
    cache: Mutex<DriverCache>,
    position_listeners: RwLock<Vec<PositionListener>>,
    rules: Arc<dyn ChessRules>,
}

impl DriverShared {
    fn cache(&self) -> MutexGuard<'_, DriverCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Board-state channel: a board frame, else a battery frame, else nothing.
    fn handle_board_state(&self, data: &[u8]) {
        let Some(board) = codec::decode_board_state(data) else {
            if let Some(level) = codec::decode_battery_level(data) {
                self.cache().battery_level = Some(level);
            }
            return;
        };

        let full_fen = match codec::normalize_fen(&board.fen_board) {
            Ok(fen) => fen,
            Err(e) => {
                error!("Board state normalize error: {}", e);
                return;
            }
        };

        let parsed = self.rules.parse_fen(&full_fen);
        let changed = {
            let mut cache = self.cache();
            let changed = cache.fen.as_deref() != Some(full_fen.as_str());
            cache.fen = Some(full_fen);
            if let Ok(position) = &parsed {
                cache.position = Some(position.clone());
            }
            changed
        };

        let position = match parsed {
            Ok(position) => position,
            Err(e) => {
                error!("Board parse error: {}", e);
                return;
            }
        };

        if changed {
            debug!("Position changed: {}", position);
            self.notify_position(&position);
        }
    }

    /// Each listener runs in isolation; errors and panics are logged.
    fn notify_position(&self, position: &Position) {
        let listeners = self
            .position_listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for listener in listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(position))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Position callback error: {:#}", e),
                Err(_) => error!("Position callback panicked"),
            }
        }
    }

    /// Command-response channel: firmware, then power, then piece state.
    fn handle_command_response(&self, data: &[u8]) {
        if let Some(version) = codec::decode_firmware_version(data) {
            info!("Firmware version: {}", version);
            self.cache().firmware_version = Some(version);
            return;
        }

        if let Some(power) = codec::decode_power_level(data) {
            debug!("Power: {}% charging={}", power.percentage, power.charging);
            let mut cache = self.cache();
            cache.is_charging = Some(power.charging);
            cache.battery_level = Some(power.percentage);
            return;
        }

        if let Some(pieces) = codec::decode_move_piece_state(data) {
            self.cache().piece_positions = Some(pieces);
            return;
        }

        debug!("Dropping unrecognized command response: {:02X?}", data);
    }
}

pub struct ChessnutDriver<B: BleBackend> {
    transport: BleTransport<B>,
    shared: Arc<DriverShared>,
}

impl<B: BleBackend> ChessnutDriver<B> {
    pub fn new(transport: BleTransport<B>) -> Self {
        Self::with_rules(transport, Arc::new(FenRules))
    }

    /// Use a different chess-rules collaborator for validating positions.
    pub fn with_rules(transport: BleTransport<B>, rules: Arc<dyn ChessRules>) -> Self {
        let shared = Arc::new(DriverShared {
            cache: Mutex::new(DriverCache::default()),
            position_listeners: RwLock::new(Vec::new()),
            rules,
        });

        let board = shared.clone();
        transport.on_board_state(Arc::new(move |data| board.handle_board_state(data)));
        let command = shared.clone();
        transport.on_command_response(Arc::new(move |data| command.handle_command_response(data)));

        Self { transport, shared }
    }

    pub fn transport(&self) -> &BleTransport<B> {
        &self.transport
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Driver fields and link state are read under the cache lock, so no
    /// board or command notification can land between the two reads.
    pub fn status(&self) -> DriverStatus {
        let cache = self.shared.cache();
        let state = self.transport.state();
        DriverStatus {
            connected: state.connected,
            phase: state.phase,
            device_name: state.device_name,
            device_address: state.device_address,
            firmware_version: cache.firmware_version.clone().or(state.firmware_version),
            battery_level: cache.battery_level.or(state.battery_level),
            is_charging: cache.is_charging,
            position: cache.position.clone(),
            fen: cache.fen.clone(),
        }
    }

    pub fn on_position_change<F>(&self, listener: F)
    where
        F: Fn(&Position) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared
            .position_listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Scan and connect to the first board found.
    pub async fn connect(&self) -> bool {
        self.transport.connect(None).await
    }

    pub async fn connect_to(&self, device: DeviceInfo) -> bool {
        self.transport.connect(Some(device)).await
    }

    pub async fn disconnect(&self) {
        self.transport.disconnect().await;
    }

    pub fn get_position(&self) -> Option<Position> {
        self.shared.cache().position.clone()
    }

    pub fn get_fen(&self) -> Option<String> {
        self.shared.cache().fen.clone()
    }

    /// Last reported robotic piece table, if any has arrived.
    pub fn get_piece_positions(&self) -> Option<PieceTable> {
        self.shared.cache().piece_positions
    }

    /// Validate and send a position. Invalid FENs are reported to the caller
    /// and nothing is sent; `Ok(false)` means the link refused the frame.
    pub async fn try_set_position(&self, fen: &str, force: bool) -> Result<bool, FenError> {
        let normalized = codec::normalize_fen(fen)?;
        self.shared.rules.parse_fen(&normalized)?;
        let frame = codec::encode_set_position(&normalized, force)?;

        if !self.is_connected() {
            error!("Not connected");
            return Ok(false);
        }
        Ok(self.transport.send(&frame, true).await)
    }

    pub async fn set_position(&self, fen: &str, force: bool) -> bool {
        match self.try_set_position(fen, force).await {
            Ok(sent) => sent,
            Err(e) => {
                error!("Invalid FEN: {}", e);
                false
            }
        }
    }

    pub async fn set_leds<S: AsRef<str>>(&self, squares: &[S], color: LedColor) -> bool {
        if !self.is_connected() {
            return false;
        }
        let frame = codec::encode_led_command_from_squares(squares, color);
        self.transport.send(&frame, true).await
    }

    pub async fn clear_leds(&self) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.transport.send(&codec::encode_clear_leds(), true).await
    }

    pub async fn beep(&self) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.transport.send(&codec::encode_buzzer_beep(), true).await
    }

    pub async fn set_buzzer_enabled(&self, enable: bool) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.transport
            .send(&codec::encode_buzzer_enable(enable), true)
            .await
    }

    // Telemetry requests are fire-and-forget: the board answers on the
    // command-response channel without a correlation id, and the cache is
    // updated if and when that answer arrives. Callers poll `status()`.

    pub async fn request_battery_level(&self) -> bool {
        self.is_connected()
            && self
                .transport
                .send(&codec::encode_get_power_level(), true)
                .await
    }

    pub async fn request_firmware_version(&self) -> bool {
        self.is_connected()
            && self
                .transport
                .send(&codec::encode_get_firmware_version(), true)
                .await
    }

    pub async fn request_piece_state(&self) -> bool {
        self.is_connected()
            && self
                .transport
                .send(&codec::encode_get_move_piece_state(), true)
                .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{LinkPhase, PiecePosition};
    use crate::infrastructure::bluetooth::backend::NotifyChannel;
    use crate::infrastructure::bluetooth::codec::tests::board_state_frame;
    use crate::infrastructure::bluetooth::mock::MockBackend;
    use crate::infrastructure::bluetooth::protocol::MOVE_PIECE_STATE_LENGTH;
    use crate::infrastructure::bluetooth::transport::TransportConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const START_BOARD: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR";
    const E4_BOARD: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR";

    async fn connected_driver() -> (ChessnutDriver<MockBackend>, MockBackend) {
        let mock = MockBackend::new().with_device("Chessnut Move", "AA:01");
        let driver = ChessnutDriver::new(BleTransport::new(
            mock.clone(),
            TransportConfig::immediate(),
        ));
        assert!(driver.connect().await);
        mock.clear_written();
        (driver, mock)
    }

    fn counting_listener(driver: &ChessnutDriver<MockBackend>) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        driver.on_position_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        calls
    }

    #[tokio::test]
    async fn test_position_listener_fires_once_per_distinct_fen() {
        let (driver, mock) = connected_driver().await;
        let calls = counting_listener(&driver);

        mock.notify(NotifyChannel::BoardState, &board_state_frame(START_BOARD));
        mock.notify(NotifyChannel::BoardState, &board_state_frame(START_BOARD));
        mock.notify(NotifyChannel::BoardState, &board_state_frame(START_BOARD));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        mock.notify(NotifyChannel::BoardState, &board_state_frame(E4_BOARD));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        mock.notify(NotifyChannel::BoardState, &board_state_frame(START_BOARD));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        assert_eq!(
            driver.get_fen().as_deref(),
            Some("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1")
        );
        assert_eq!(driver.get_position().unwrap().board_fen(), START_BOARD);
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_block_others() {
        let (driver, mock) = connected_driver().await;
        driver.on_position_change(|_| anyhow::bail!("listener failed"));
        driver.on_position_change(|_| panic!("listener panicked"));
        let calls = counting_listener(&driver);

        mock.notify(NotifyChannel::BoardState, &board_state_frame(START_BOARD));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(driver.get_position().unwrap().board_fen(), START_BOARD);
    }

    #[tokio::test]
    async fn test_command_responses_update_cache() {
        let (driver, mock) = connected_driver().await;

        let mut firmware = vec![0x41, 0x06, 0x09];
        firmware.extend_from_slice(b"2.0.1");
        mock.notify(NotifyChannel::CommandResponse, &firmware);
        mock.notify(NotifyChannel::CommandResponse, &[0x41, 0x03, 0x0C, 1, 80]);

        let mut pieces = vec![0u8; MOVE_PIECE_STATE_LENGTH];
        pieces[0] = 0x41;
        pieces[2] = 0x0B;
        pieces[4..7].copy_from_slice(&[2, 5, 60]);
        mock.notify(NotifyChannel::CommandResponse, &pieces);

        mock.notify(NotifyChannel::CommandResponse, &[0x41, 0x01, 0x1C]);

        let status = driver.status();
        assert!(status.connected);
        assert_eq!(status.phase, LinkPhase::Connected);
        assert_eq!(status.firmware_version.as_deref(), Some("2.0.1"));
        assert_eq!(status.battery_level, Some(80));
        assert_eq!(status.is_charging, Some(true));

        let table = driver.get_piece_positions().unwrap();
        assert_eq!(table.len(), 34);
        assert_eq!(table[0], PiecePosition { x: 2, y: 5, battery: 60 });
    }

    #[tokio::test]
    async fn test_battery_frame_on_board_channel() {
        let (driver, mock) = connected_driver().await;
        let calls = counting_listener(&driver);

        mock.notify(NotifyChannel::BoardState, &[0x2A, 0x00, 55]);
        assert_eq!(driver.status().battery_level, Some(55));
        assert_eq!(driver.get_fen(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_board_channel_battery_fallback_updates_cache() {
        let driver = ChessnutDriver::new(BleTransport::new(
            MockBackend::new(),
            TransportConfig::immediate(),
        ));
        let calls = counting_listener(&driver);

        driver.shared.handle_board_state(&[0x2A, 0x00, 55]);
        assert_eq!(driver.shared.cache().battery_level, Some(55));
        assert_eq!(driver.transport().state().battery_level, None);
        assert_eq!(driver.status().battery_level, Some(55));

        driver.shared.handle_board_state(&[0x77, 0x00, 12]);
        assert_eq!(driver.shared.cache().battery_level, Some(55));
        assert_eq!(driver.get_fen(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_set_position_sends_sync_frame() {
        let (driver, mock) = connected_driver().await;

        assert!(driver.set_position(START_BOARD, false).await);
        let written = mock.written();
        assert_eq!(written.len(), 1);
        assert_eq!(
            written[0],
            codec::encode_set_position(START_BOARD, false).unwrap().to_vec()
        );
    }

    #[tokio::test]
    async fn test_invalid_fen_is_rejected_before_sending() {
        let (driver, mock) = connected_driver().await;

        assert!(!driver.set_position("not a fen", true).await);
        assert!(matches!(
            driver.try_set_position("rnbqkbnr/pppppppp/8/8", true).await,
            Err(FenError::MalformedBoard(_))
        ));
        assert!(matches!(
            driver.try_set_position("", true).await,
            Err(FenError::InvalidFen(_))
        ));
        assert!(mock.written().is_empty());
    }

    #[tokio::test]
    async fn test_commands_require_connection() {
        let mock = MockBackend::new();
        let driver = ChessnutDriver::new(BleTransport::new(
            mock.clone(),
            TransportConfig::immediate(),
        ));

        assert!(!driver.set_position(START_BOARD, true).await);
        assert!(!driver.set_leds(&["e2"], LedColor::Red).await);
        assert!(!driver.clear_leds().await);
        assert!(!driver.beep().await);
        assert!(!driver.set_buzzer_enabled(true).await);
        assert!(!driver.request_battery_level().await);
        assert!(mock.written().is_empty());
    }

    #[tokio::test]
    async fn test_command_frames() {
        let (driver, mock) = connected_driver().await;

        assert!(driver.set_leds(&["e2", "e4"], LedColor::Red).await);
        assert!(driver.clear_leds().await);
        assert!(driver.beep().await);
        assert!(driver.set_buzzer_enabled(false).await);
        assert!(driver.request_battery_level().await);
        assert!(driver.request_firmware_version().await);
        assert!(driver.request_piece_state().await);

        let written = mock.written();
        assert_eq!(
            written[0],
            codec::encode_led_command_from_squares(["e2", "e4"], LedColor::Red).to_vec()
        );
        assert_eq!(written[1], codec::encode_clear_leds().to_vec());
        assert_eq!(written[2], codec::encode_buzzer_beep().to_vec());
        assert_eq!(written[3], vec![0x1B, 0x01, 0x00]);
        assert_eq!(written[4], vec![0x41, 0x01, 0x0C]);
        assert_eq!(written[5], vec![0x41, 0x01, 0x09]);
        assert_eq!(written[6], vec![0x41, 0x01, 0x0B]);
    }

    #[tokio::test]
    async fn test_status_after_disconnect() {
        let (driver, mock) = connected_driver().await;
        mock.notify(NotifyChannel::BoardState, &board_state_frame(START_BOARD));

        driver.disconnect().await;
        let status = driver.status();
        assert!(!status.connected);
        assert_eq!(status.phase, LinkPhase::Idle);
        assert!(status.fen.is_some());
        assert!(!driver.is_connected());
    }
}
