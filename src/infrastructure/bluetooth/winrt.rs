//! WinRT BLE Backend
//!
//! Advertisement-watcher discovery and GATT access through the Windows
//! Runtime. Windows negotiates the ATT MTU on its own; the MTU step only
//! opens a `GattSession` that keeps the link alive and logs the PDU size.

use crate::domain::error::{TransportError, TransportResult};
use crate::domain::models::DeviceInfo;
use crate::infrastructure::bluetooth::backend::{BleBackend, NotifyChannel};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::NotificationRouter;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};
use windows::core::GUID;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattClientCharacteristicConfigurationDescriptorValue,
    GattCommunicationStatus, GattSession, GattValueChangedEventArgs, GattWriteOption,
};
use windows::Devices::Bluetooth::{BluetoothConnectionStatus, BluetoothLEDevice};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter};

#[derive(Clone)]
struct WinRtLink {
    device: BluetoothLEDevice,
    session: Option<GattSession>,
    fen_notify: GattCharacteristic,
    command_write: GattCharacteristic,
    command_notify: GattCharacteristic,
    router: NotificationRouter,
}

/// Backend over `Windows.Devices.Bluetooth`
#[derive(Default)]
pub struct WinRtBackend {
    link: Mutex<Option<WinRtLink>>,
}

fn platform(e: anyhow::Error) -> TransportError {
    TransportError::Platform(format!("{:#}", e))
}

impl WinRtBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_link(&self) -> TransportResult<WinRtLink> {
        self.link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(TransportError::NotConnected)
    }

    async fn run_scan(timeout: Duration) -> Result<Vec<DeviceInfo>> {
        let seen: Arc<Mutex<HashMap<u64, String>>> = Arc::new(Mutex::new(HashMap::new()));

        let watcher = BluetoothLEAdvertisementWatcher::new()?;
        watcher.SetScanningMode(BluetoothLEScanningMode::Active)?;

        let sink = seen.clone();
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let name = args.Advertisement()?.LocalName()?.to_string();
                    if !name.is_empty() {
                        let address = args.BluetoothAddress()?;
                        sink.lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .insert(address, name);
                    }
                }
                Ok(())
            },
        );

        watcher.Received(&handler)?;
        watcher.Start()?;
        tokio::time::sleep(timeout).await;
        watcher.Stop()?;

        let seen = seen.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(seen
            .iter()
            .map(|(address, name)| DeviceInfo {
                name: name.clone(),
                address: format_address(*address),
            })
            .collect())
    }

    async fn open(device: &DeviceInfo, router: NotificationRouter) -> Result<WinRtLink> {
        let address = parse_address(&device.address)?;
        let ble = BluetoothLEDevice::FromBluetoothAddressAsync(address)?.await?;
        info!("Device opened: {:?}", ble.Name()?);

        let fen_notify =
            find_characteristic(&ble, protocol::FEN_SERVICE_UUID, protocol::FEN_NOTIFY_UUID).await?;
        let command_write =
            find_characteristic(&ble, protocol::COMMAND_SERVICE_UUID, protocol::COMMAND_WRITE_UUID)
                .await?;
        let command_notify =
            find_characteristic(&ble, protocol::COMMAND_SERVICE_UUID, protocol::COMMAND_NOTIFY_UUID)
                .await?;

        let lost = router.clone();
        let status_handler =
            TypedEventHandler::new(move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
                if let Some(dev) = dev.as_ref() {
                    if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                        lost.link_lost();
                    }
                }
                Ok(())
            });
        ble.ConnectionStatusChanged(&status_handler)?;

        Ok(WinRtLink {
            device: ble,
            session: None,
            fen_notify,
            command_write,
            command_notify,
            router,
        })
    }

    async fn open_session(link: &WinRtLink, mtu: u16) -> Result<GattSession> {
        let device_id = link.device.BluetoothDeviceId()?;
        let session = GattSession::FromDeviceIdAsync(&device_id)?.await?;
        session.SetMaintainConnection(true)?;
        debug!(
            "GattSession open, requested MTU {}, platform PDU size {}",
            mtu,
            session.MaxPduSize()?
        );
        Ok(session)
    }

    async fn enable_notifications(link: &WinRtLink, channel: NotifyChannel) -> Result<()> {
        let characteristic = match channel {
            NotifyChannel::BoardState => link.fen_notify.clone(),
            NotifyChannel::CommandResponse => link.command_notify.clone(),
        };

        let router = link.router.clone();
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<GattCharacteristic>,
                  args: windows::core::Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let value = args.CharacteristicValue()?;
                    let reader = DataReader::FromBuffer(&value)?;
                    let mut bytes = vec![0u8; reader.UnconsumedBufferLength()? as usize];
                    reader.ReadBytes(&mut bytes)?;
                    router.deliver(channel, &bytes);
                }
                Ok(())
            },
        );
        characteristic.ValueChanged(&handler)?;

        let status = characteristic
            .WriteClientCharacteristicConfigurationDescriptorAsync(
                GattClientCharacteristicConfigurationDescriptorValue::Notify,
            )?
            .await?;
        if status != GattCommunicationStatus::Success {
            anyhow::bail!("Notification subscription returned status: {:?}", status);
        }
        info!("Notifications enabled on {:?}", channel);
        Ok(())
    }

    async fn write_value(link: &WinRtLink, data: &[u8], with_response: bool) -> Result<()> {
        let writer = DataWriter::new()?;
        writer.WriteBytes(data)?;
        let buffer = writer.DetachBuffer()?;

        let option = if with_response {
            GattWriteOption::WriteWithResponse
        } else {
            GattWriteOption::WriteWithoutResponse
        };
        let status = link
            .command_write
            .WriteValueWithOptionAsync(&buffer, option)?
            .await?;
        if status != GattCommunicationStatus::Success {
            anyhow::bail!("Write returned status: {:?}", status);
        }
        Ok(())
    }

    fn close(link: WinRtLink) -> Result<()> {
        if let Some(session) = link.session {
            session.Close()?;
        }
        link.device.Close()?;
        Ok(())
    }
}

#[async_trait]
impl BleBackend for WinRtBackend {
    async fn scan(&self, timeout: Duration) -> TransportResult<Vec<DeviceInfo>> {
        Self::run_scan(timeout).await.map_err(platform)
    }

    async fn connect(&self, device: &DeviceInfo, router: NotificationRouter) -> TransportResult<()> {
        let link = Self::open(device, router).await.map_err(platform)?;
        let previous = self
            .link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(link);
        if let Some(previous) = previous {
            if let Err(e) = Self::close(previous) {
                warn!("Closing previous link failed: {:#}", e);
            }
        }
        Ok(())
    }

    async fn request_mtu(&self, mtu: u16) -> TransportResult<()> {
        let link = self.current_link()?;
        let session = Self::open_session(&link, mtu).await.map_err(platform)?;
        if let Some(current) = self
            .link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            current.session = Some(session);
        }
        Ok(())
    }

    async fn subscribe(&self, channel: NotifyChannel) -> TransportResult<()> {
        let link = self.current_link()?;
        Self::enable_notifications(&link, channel)
            .await
            .map_err(|e| TransportError::Setup(format!("{:#}", e)))
    }

    async fn write(&self, data: &[u8], with_response: bool) -> TransportResult<()> {
        let link = self.current_link()?;
        Self::write_value(&link, data, with_response)
            .await
            .map_err(platform)
    }

    async fn disconnect(&self) -> TransportResult<()> {
        let link = self.link.lock().unwrap_or_else(PoisonError::into_inner).take();
        match link {
            Some(link) => Self::close(link).map_err(platform),
            None => Ok(()),
        }
    }

    fn is_connected(&self) -> bool {
        self.link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|link| link.device.ConnectionStatus().ok())
            .map(|s| s == BluetoothConnectionStatus::Connected)
            .unwrap_or(false)
    }
}

/// First characteristic `char_uuid` of the first service `service_uuid`.
async fn find_characteristic(
    device: &BluetoothLEDevice,
    service_uuid: &str,
    char_uuid: &str,
) -> Result<GattCharacteristic> {
    let services_result = device
        .GetGattServicesForUuidAsync(parse_uuid(service_uuid)?)?
        .await?;
    if services_result.Status()? != GattCommunicationStatus::Success {
        anyhow::bail!("Failed to get GATT service {}", service_uuid);
    }
    let service = {
        let services = services_result.Services()?;
        if services.Size()? == 0 {
            anyhow::bail!("Service {} not found", service_uuid);
        }
        services.GetAt(0)?
    };

    let chars_result = service
        .GetCharacteristicsForUuidAsync(parse_uuid(char_uuid)?)?
        .await?;
    if chars_result.Status()? != GattCommunicationStatus::Success {
        anyhow::bail!("Failed to get characteristic {}", char_uuid);
    }
    let characteristics = chars_result.Characteristics()?;
    if characteristics.Size()? == 0 {
        anyhow::bail!("Characteristic {} not found", char_uuid);
    }
    Ok(characteristics.GetAt(0)?)
}

/// Parse a UUID string into a Windows GUID
fn parse_uuid(uuid_str: &str) -> Result<GUID> {
    let uuid_str = uuid_str.replace('-', "");
    if uuid_str.len() != 32 {
        return Err(anyhow::anyhow!("Invalid UUID format"));
    }

    let d1 = u32::from_str_radix(&uuid_str[0..8], 16)?;
    let d2 = u16::from_str_radix(&uuid_str[8..12], 16)?;
    let d3 = u16::from_str_radix(&uuid_str[12..16], 16)?;

    let mut d4 = [0u8; 8];
    for (i, byte) in d4.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&uuid_str[16 + i * 2..18 + i * 2], 16)?;
    }

    Ok(GUID {
        data1: d1,
        data2: d2,
        data3: d3,
        data4: d4,
    })
}

/// `0xAABBCCDDEEFF` -> `"AA:BB:CC:DD:EE:FF"`
fn format_address(address: u64) -> String {
    let bytes = address.to_be_bytes();
    bytes[2..]
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

fn parse_address(address: &str) -> Result<u64> {
    Ok(u64::from_str_radix(&address.replace(':', ""), 16)?)
}
