use anyhow::Result;
use chessnut_move::domain::settings::SettingsService;
use chessnut_move::infrastructure::logging;
use chessnut_move::{
    AutoConnectConfig, BleBackend, BleTransport, ChessnutDriver, DriverManager, TransportConfig,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let mut settings_service = SettingsService::new()?;
    settings_service
        .get_mut()
        .apply_env_overrides(std::env::vars());

    let _log_guard = logging::init_logger(&settings_service.get().log_settings)?;
    info!("Starting Chessnut Move driver");

    if !settings_service.get().driver_enabled {
        info!("Driver disabled by configuration");
        return Ok(());
    }

    #[cfg(windows)]
    {
        let backend = chessnut_move::infrastructure::bluetooth::WinRtBackend::new();
        run(backend, settings_service).await
    }

    #[cfg(not(windows))]
    {
        error!("No BLE backend is available on this platform");
        anyhow::bail!("unsupported platform")
    }
}

#[cfg_attr(not(windows), allow(dead_code))]
async fn run<B: BleBackend>(backend: B, mut settings_service: SettingsService) -> Result<()> {
    let settings = settings_service.get().clone();

    let transport = BleTransport::new(backend, TransportConfig::from_settings(&settings));
    let driver = ChessnutDriver::new(transport);
    driver.on_position_change(|position| {
        info!("Board position: {}", position);
        Ok(())
    });

    let manager = DriverManager::new(driver, AutoConnectConfig::from_settings(&settings));

    if !manager.auto_connect_enabled() {
        let connected = match settings.last_connected_device.clone() {
            Some(device) => manager.connect_to(device).await || manager.connect().await,
            None => manager.connect().await,
        };

        if connected {
            let status = manager.driver().status();
            if let (Some(name), Some(address)) = (status.device_name, status.device_address) {
                let device = chessnut_move::DeviceInfo { name, address };
                if let Err(e) = settings_service.remember_device(&device) {
                    warn!("Could not save settings: {:#}", e);
                }
            }
            manager.driver().request_firmware_version().await;
        } else {
            error!("Initial connection failed");
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    manager.shutdown().await;
    Ok(())
}
