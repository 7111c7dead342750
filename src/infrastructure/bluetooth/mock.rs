//! Scriptable in-memory backend for tests.

use crate::domain::error::{TransportError, TransportResult};
use crate::domain::models::DeviceInfo;
use crate::infrastructure::bluetooth::backend::{BleBackend, NotifyChannel};
use crate::infrastructure::bluetooth::transport::NotificationRouter;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct MockInner {
    devices: Mutex<Vec<DeviceInfo>>,
    connected: AtomicBool,
    router: Mutex<Option<NotificationRouter>>,
    written: Mutex<Vec<Vec<u8>>>,
    subscriptions: Mutex<Vec<NotifyChannel>>,
    connect_delay: Mutex<Duration>,
    fail_connect: AtomicBool,
    fail_mtu: AtomicBool,
    fail_subscribe: AtomicBool,
    hang_subscribe: AtomicBool,
    fail_write: AtomicBool,
    fail_disconnect: AtomicBool,
    scan_calls: AtomicUsize,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
}

/// Clones share state, so a test can keep a handle while the transport owns
/// another.
#[derive(Clone, Default)]
pub struct MockBackend {
    inner: Arc<MockInner>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(self, name: &str, address: &str) -> Self {
        self.inner.devices.lock().unwrap().push(DeviceInfo {
            name: name.to_string(),
            address: address.to_string(),
        });
        self
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.inner.connect_delay.lock().unwrap() = delay;
    }

    pub fn fail_connect(&self, fail: bool) {
        self.inner.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_mtu(&self, fail: bool) {
        self.inner.fail_mtu.store(fail, Ordering::SeqCst);
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.inner.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Subscriptions never complete, like a lost CCCD write.
    pub fn hang_subscribe(&self, hang: bool) {
        self.inner.hang_subscribe.store(hang, Ordering::SeqCst);
    }

    pub fn fail_write(&self, fail: bool) {
        self.inner.fail_write.store(fail, Ordering::SeqCst);
    }

    pub fn fail_disconnect(&self, fail: bool) {
        self.inner.fail_disconnect.store(fail, Ordering::SeqCst);
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.inner.written.lock().unwrap().clone()
    }

    pub fn clear_written(&self) {
        self.inner.written.lock().unwrap().clear();
    }

    pub fn subscriptions(&self) -> Vec<NotifyChannel> {
        self.inner.subscriptions.lock().unwrap().clone()
    }

    pub fn router(&self) -> Option<NotificationRouter> {
        self.inner.router.lock().unwrap().clone()
    }

    pub fn scan_calls(&self) -> usize {
        self.inner.scan_calls.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.inner.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.inner.disconnect_calls.load(Ordering::SeqCst)
    }

    /// Push a notification as the platform would.
    pub fn notify(&self, channel: NotifyChannel, data: &[u8]) {
        if let Some(router) = self.router() {
            router.deliver(channel, data);
        }
    }

    /// Simulate the peripheral going away.
    pub fn drop_link(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        if let Some(router) = self.router() {
            router.link_lost();
        }
    }
}

#[async_trait]
impl BleBackend for MockBackend {
    async fn scan(&self, _timeout: Duration) -> TransportResult<Vec<DeviceInfo>> {
        self.inner.scan_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.inner.devices.lock().unwrap().clone())
    }

    async fn connect(&self, _device: &DeviceInfo, router: NotificationRouter) -> TransportResult<()> {
        self.inner.connect_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.inner.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.inner.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::Platform("connect refused".to_string()));
        }
        *self.inner.router.lock().unwrap() = Some(router);
        self.inner.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn request_mtu(&self, _mtu: u16) -> TransportResult<()> {
        if self.inner.fail_mtu.load(Ordering::SeqCst) {
            return Err(TransportError::Platform("mtu not supported".to_string()));
        }
        Ok(())
    }

    async fn subscribe(&self, channel: NotifyChannel) -> TransportResult<()> {
        if self.inner.hang_subscribe.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.inner.fail_subscribe.load(Ordering::SeqCst) {
            return Err(TransportError::Platform("subscribe refused".to_string()));
        }
        self.inner.subscriptions.lock().unwrap().push(channel);
        Ok(())
    }

    async fn write(&self, data: &[u8], _with_response: bool) -> TransportResult<()> {
        if self.inner.fail_write.load(Ordering::SeqCst) {
            return Err(TransportError::Platform("write failed".to_string()));
        }
        self.inner.written.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.inner.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.subscriptions.lock().unwrap().clear();
        if self.inner.fail_disconnect.load(Ordering::SeqCst) {
            return Err(TransportError::Platform("disconnect failed".to_string()));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }
}
