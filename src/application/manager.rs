//! Connection Orchestrator
//!
//! Serializes every connect and disconnect behind one async mutex and runs
//! the background auto-connect loop through the same guarded path.

use crate::application::driver::ChessnutDriver;
use crate::domain::models::DeviceInfo;
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::backend::BleBackend;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoConnectConfig {
    pub enabled: bool,
    pub retry_interval: Duration,
}

impl Default for AutoConnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            retry_interval: Duration::from_secs(1),
        }
    }
}

impl AutoConnectConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            enabled: settings.driver_enabled && settings.auto_connect,
            retry_interval: Duration::from_millis(settings.auto_connect_retry_ms),
        }
    }
}

struct AutoConnectTask {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

pub struct DriverManager<B: BleBackend> {
    driver: Arc<ChessnutDriver<B>>,
    /// Exclusive section for every connect/disconnect
    link_lock: Arc<tokio::sync::Mutex<()>>,
    enabled: Arc<AtomicBool>,
    retry_interval: Duration,
    task: Mutex<Option<AutoConnectTask>>,
}

impl<B: BleBackend> DriverManager<B> {
    /// Must be called inside a Tokio runtime when `config.enabled` is set.
    pub fn new(driver: ChessnutDriver<B>, config: AutoConnectConfig) -> Self {
        let manager = Self {
            driver: Arc::new(driver),
            link_lock: Arc::new(tokio::sync::Mutex::new(())),
            enabled: Arc::new(AtomicBool::new(config.enabled)),
            retry_interval: config.retry_interval,
            task: Mutex::new(None),
        };
        if config.enabled {
            manager.start_auto_connect();
        }
        manager
    }

    pub fn driver(&self) -> &Arc<ChessnutDriver<B>> {
        &self.driver
    }

    pub fn auto_connect_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub async fn connect(&self) -> bool {
        let _guard = self.link_lock.lock().await;
        self.driver.connect().await
    }

    pub async fn connect_to(&self, device: DeviceInfo) -> bool {
        let _guard = self.link_lock.lock().await;
        self.driver.connect_to(device).await
    }

    pub async fn disconnect(&self) {
        let _guard = self.link_lock.lock().await;
        self.driver.disconnect().await;
    }

    /// Enable or disable the auto-connect loop. When disabling, returns only
    /// after the loop has terminated, so no connect attempt is in flight.
    pub async fn set_auto_connect(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        if enabled {
            self.start_auto_connect();
        } else {
            self.stop_auto_connect().await;
        }
    }

    /// Disable auto-connect, then disconnect.
    pub async fn shutdown(&self) {
        self.set_auto_connect(false).await;
        self.disconnect().await;
    }

    fn start_auto_connect(&self) {
        let mut slot = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            return;
        }

        info!("Starting auto-connect loop ({:?})", self.retry_interval);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(auto_connect_loop(
            self.driver.clone(),
            self.link_lock.clone(),
            self.enabled.clone(),
            self.retry_interval,
            cancel.clone(),
        ));
        *slot = Some(AutoConnectTask { handle, cancel });
    }

    async fn stop_auto_connect(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(task) = task else {
            return;
        };

        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            warn!("Auto-connect loop ended abnormally: {}", e);
        }
        info!("Auto-connect loop stopped");
    }
}

impl<B: BleBackend> Drop for DriverManager<B> {
    fn drop(&mut self) {
        let slot = self.task.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = slot.take() {
            task.cancel.cancel();
        }
    }
}

async fn auto_connect_loop<B: BleBackend>(
    driver: Arc<ChessnutDriver<B>>,
    link_lock: Arc<tokio::sync::Mutex<()>>,
    enabled: Arc<AtomicBool>,
    retry_interval: Duration,
    cancel: CancellationToken,
) {
    while enabled.load(Ordering::SeqCst) {
        if !driver.is_connected() {
            let guard = tokio::select! {
                _ = cancel.cancelled() => break,
                guard = link_lock.lock() => guard,
            };

            // Re-check under the lock: a disable or an explicit connect may
            // have won the race.
            if enabled.load(Ordering::SeqCst) && !driver.is_connected() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!("Auto-connect cancelled mid-connect, rolling back");
                        driver.disconnect().await;
                        break;
                    }
                    connected = driver.connect() => {
                        if connected {
                            info!("Auto-connect succeeded");
                        } else {
                            debug!("Auto-connect attempt failed");
                        }
                    }
                }
            }
            drop(guard);
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(retry_interval) => {}
        }
    }
    debug!("Auto-connect loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::mock::MockBackend;
    use crate::infrastructure::bluetooth::transport::{BleTransport, TransportConfig};
    use tokio::time::{sleep, timeout};

    const RETRY: Duration = Duration::from_millis(10);

    fn manager(mock: &MockBackend, enabled: bool) -> DriverManager<MockBackend> {
        let driver = ChessnutDriver::new(BleTransport::new(
            mock.clone(),
            TransportConfig::immediate(),
        ));
        DriverManager::new(
            driver,
            AutoConnectConfig {
                enabled,
                retry_interval: RETRY,
            },
        )
    }

    async fn wait_until_connected(manager: &DriverManager<MockBackend>) -> bool {
        for _ in 0..200 {
            if manager.driver().is_connected() {
                return true;
            }
            sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[test]
    fn test_config_from_settings() {
        let settings = Settings {
            auto_connect: true,
            driver_enabled: false,
            auto_connect_retry_ms: 250,
            ..Settings::default()
        };
        let config = AutoConnectConfig::from_settings(&settings);
        assert!(!config.enabled);
        assert_eq!(config.retry_interval, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_explicit_connect_and_disconnect() {
        let mock = MockBackend::new().with_device("Chessnut Move", "AA:01");
        let manager = manager(&mock, false);

        assert!(manager.connect().await);
        assert!(manager.driver().is_connected());
        manager.disconnect().await;
        assert!(!manager.driver().is_connected());
    }

    #[tokio::test]
    async fn test_auto_connect_connects_and_reconnects() {
        let mock = MockBackend::new().with_device("Chessnut Move", "AA:01");
        let manager = manager(&mock, true);
        assert!(manager.auto_connect_enabled());
        assert!(wait_until_connected(&manager).await);

        mock.drop_link();
        assert!(!manager.driver().is_connected());
        assert!(wait_until_connected(&manager).await);
        assert!(mock.connect_calls() >= 2);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_no_attempts_after_disable() {
        let mock = MockBackend::new();
        let manager = manager(&mock, false);

        manager.set_auto_connect(true).await;
        sleep(RETRY * 5).await;
        assert!(mock.scan_calls() > 0);

        manager.set_auto_connect(false).await;
        assert!(!manager.auto_connect_enabled());
        let attempts = mock.scan_calls();
        sleep(RETRY * 10).await;
        assert_eq!(mock.scan_calls(), attempts);
    }

    #[tokio::test]
    async fn test_enable_twice_runs_one_loop() {
        let mock = MockBackend::new();
        let manager = manager(&mock, false);

        let started = std::time::Instant::now();
        manager.set_auto_connect(true).await;
        manager.set_auto_connect(true).await;
        sleep(RETRY * 10).await;
        manager.set_auto_connect(false).await;

        // one loop does at most one scan per retry interval
        let intervals = (started.elapsed().as_millis() / RETRY.as_millis()) as usize;
        assert!(mock.scan_calls() <= intervals + 1);
    }

    #[tokio::test]
    async fn test_disable_mid_connect_releases_lock() {
        let mock = MockBackend::new().with_device("Chessnut Move", "AA:01");
        mock.set_connect_delay(Duration::from_millis(400));
        let manager = manager(&mock, true);

        sleep(Duration::from_millis(50)).await;
        assert_eq!(mock.connect_calls(), 1);

        timeout(Duration::from_millis(200), manager.set_auto_connect(false))
            .await
            .expect("disable should not wait for the connect to finish");
        assert!(!manager.driver().is_connected());
        assert!(mock.disconnect_calls() >= 1);

        mock.set_connect_delay(Duration::ZERO);
        let connected = timeout(Duration::from_millis(500), manager.connect())
            .await
            .expect("exclusive section should be free");
        assert!(connected);
    }

    #[tokio::test]
    async fn test_stalled_setup_does_not_hold_exclusive_section() {
        let mock = MockBackend::new().with_device("Chessnut Move", "AA:01");
        mock.hang_subscribe(true);
        let manager = manager(&mock, false);

        let connected = timeout(Duration::from_secs(3), manager.connect())
            .await
            .expect("connect must give up at its deadline");
        assert!(!connected);

        timeout(Duration::from_secs(1), manager.shutdown())
            .await
            .expect("shutdown should get the exclusive section");
        assert!(!manager.driver().is_connected());
    }

    #[tokio::test]
    async fn test_shutdown_prevents_reconnect() {
        let mock = MockBackend::new().with_device("Chessnut Move", "AA:01");
        let manager = manager(&mock, true);
        assert!(wait_until_connected(&manager).await);

        manager.shutdown().await;
        assert!(!manager.auto_connect_enabled());
        assert!(!manager.driver().is_connected());

        sleep(RETRY * 10).await;
        assert!(!manager.driver().is_connected());
        assert_eq!(mock.connect_calls(), 1);
    }
}
