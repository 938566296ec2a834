use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backoff::{Backoff, retry_with_backoff_if};
use crate::error::PeripheralError;
use crate::profile::{CharacteristicRole, HardwareProfile, Keepalive};
use crate::pump::RewardPump;
use crate::transport::{DeviceFilter, DeviceInfo, PumpTransport};

/// Connection state published to observers (status line, tests).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected { reason: Option<String> },
    Scanning,
    Connecting,
    Connected { device: String },
    Reconnecting { attempt: u32, remaining: u32 },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }

    fn disconnected(reason: impl Into<String>) -> Self {
        ConnectionState::Disconnected {
            reason: Some(reason.into()),
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected { reason: None } => write!(f, "Disconnected"),
            ConnectionState::Disconnected {
                reason: Some(reason),
            } => write!(f, "Disconnected: {reason}"),
            ConnectionState::Scanning => write!(f, "Waiting for user to select device"),
            ConnectionState::Connecting => write!(f, "Connecting to GATT server"),
            ConnectionState::Connected { device } => write!(f, "Connected to {device}"),
            ConnectionState::Reconnecting { attempt, remaining } => write!(
                f,
                "Attempting to reconnect (attempt {attempt}, {remaining} tries left)"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeripheralConfig {
    pub filter: DeviceFilter,
    pub profile: HardwareProfile,
    pub reconnect: Backoff,
    /// `None` disables the keepalive ping.
    pub keepalive: Option<Keepalive>,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            filter: DeviceFilter::default(),
            profile: HardwareProfile::default(),
            reconnect: Backoff::default(),
            keepalive: Some(Keepalive::default()),
        }
    }
}

/// Wireless pump controller with automatic reconnection.
///
/// `Disconnected -> Scanning -> Connecting -> Connected`. A hardware-initiated
/// disconnect starts a backoff reconnect loop; exhausting it leaves the
/// peripheral disconnected until the next [`RewardPeripheral::scan`].
pub struct RewardPeripheral<T: PumpTransport> {
    inner: Arc<Inner<T>>,
}

impl<T: PumpTransport> Clone for RewardPeripheral<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T> {
    transport: T,
    config: PeripheralConfig,
    state: watch::Sender<ConnectionState>,
    device: Mutex<Option<DeviceInfo>>,
    /// Bumped on every new link; background tasks of older links exit.
    generation: AtomicU64,
    writes: tokio::sync::Mutex<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: PumpTransport> RewardPeripheral<T> {
    pub fn new(transport: T, config: PeripheralConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected { reason: None });
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                state,
                device: Mutex::new(None),
                generation: AtomicU64::new(0),
                writes: tokio::sync::Mutex::new(()),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Asks the user for a device and connects to it.
    ///
    /// Returns `Ok(false)` when no device was selected. Any failure while
    /// establishing the link leaves the peripheral disconnected with the
    /// reason in its state.
    pub async fn scan(&self) -> Result<bool, PeripheralError> {
        Inner::scan(&self.inner).await
    }

    /// Closes the link on purpose. No reconnection follows.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        inner.retire_link();
        inner.transport.close().await;
        inner.set_state(ConnectionState::disconnected("closed by operator"));
    }
}

impl<T: PumpTransport> Inner<T> {
    fn set_state(&self, state: ConnectionState) {
        info!("pump: {state}");
        self.state.send_replace(state);
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Stops the monitor, reconnect and keepalive tasks of the current link.
    fn retire_link(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    async fn scan(self: &Arc<Self>) -> Result<bool, PeripheralError> {
        if self.is_connected() {
            return Ok(true);
        }
        self.retire_link();
        self.set_state(ConnectionState::Scanning);

        let device = match self.transport.request_device(&self.config.filter).await {
            Ok(Some(device)) => device,
            Ok(None) => {
                self.set_state(ConnectionState::disconnected("no device selected"));
                return Ok(false);
            }
            Err(e) => {
                self.set_state(ConnectionState::disconnected(format!(
                    "Error getting device: {e}"
                )));
                return Err(e.into());
            }
        };
        info!("Found device: {} (ID: {})", device.name, device.id);
        *self.device.lock() = Some(device.clone());

        self.set_state(ConnectionState::Connecting);
        match self.establish(&device).await {
            Ok(()) => {
                self.on_connected(&device);
                Ok(true)
            }
            Err(e) => {
                self.set_state(ConnectionState::disconnected(format!(
                    "Connection failed: {e}"
                )));
                Err(e)
            }
        }
    }

    /// Opens the link and resolves the profile's service and characteristics.
    /// A link that opened but failed discovery is closed again.
    async fn establish(&self, device: &DeviceInfo) -> Result<(), PeripheralError> {
        let limit = self.config.profile.connect_timeout;
        within(limit, "open", self.transport.open(device)).await??;

        let discovered = self.discover().await;
        if discovered.is_err() {
            self.transport.close().await;
        }
        discovered
    }

    async fn discover(&self) -> Result<(), PeripheralError> {
        let profile = &self.config.profile;
        let limit = profile.connect_timeout;
        within(
            limit,
            "service discovery",
            self.transport.resolve_service(profile.service),
        )
        .await?
        .map_err(|e| PeripheralError::ServiceNotFound(profile.service, e))?;

        for (role, uuid) in &profile.characteristics {
            within(
                limit,
                "characteristic discovery",
                self.transport.resolve_characteristic(profile.service, *uuid),
            )
            .await?
            .map_err(|e| PeripheralError::CharacteristicNotFound(*uuid, e))?;
            debug!("resolved {} characteristic {uuid:#06x}", role.as_str());
        }
        Ok(())
    }

    fn on_connected(self: &Arc<Self>, device: &DeviceInfo) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_state(ConnectionState::Connected {
            device: device.name.clone(),
        });

        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());

        let inner = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            inner.transport.closed().await;
            if inner.generation() == generation {
                inner.reconnect().await;
            }
        }));

        if let Some(keepalive) = self.config.keepalive.clone() {
            let inner = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                inner.keepalive(generation, keepalive).await;
            }));
        }
    }

    async fn reconnect(self: &Arc<Self>) {
        self.set_state(ConnectionState::disconnected("BLE disconnected"));
        let device = self.device.lock().clone();
        let Some(device) = device else {
            return;
        };

        let generation = self.generation();
        let backoff = self.config.reconnect.clone();
        let result = retry_with_backoff_if(
            &backoff,
            "pump reconnect",
            PeripheralError::is_retryable,
            |attempt| {
                let inner = Arc::clone(self);
                let device = device.clone();
                let remaining = backoff.max_retries - attempt;
                async move {
                    if inner.generation() != generation {
                        return Err(PeripheralError::Superseded);
                    }
                    inner.set_state(ConnectionState::Reconnecting {
                        attempt: attempt + 1,
                        remaining,
                    });
                    inner.establish(&device).await
                }
            },
        )
        .await;

        if self.generation() != generation {
            debug!("reconnect to {} superseded", device.name);
            return;
        }
        match result {
            Ok(()) => {
                info!("Successful reconnection to {}", device.name);
                self.on_connected(&device);
            }
            Err(e) => self.set_state(ConnectionState::disconnected(format!(
                "Could not reconnect to the pump after multiple tries: {e}"
            ))),
        }
    }

    async fn keepalive(&self, generation: u64, keepalive: Keepalive) {
        let Some(uuid) = self.config.profile.uuid(CharacteristicRole::Connection) else {
            debug!("profile has no connection characteristic, keepalive disabled");
            return;
        };
        let payload = self.config.profile.encoding.encode(keepalive.ping_duration_ms);
        loop {
            tokio::time::sleep(keepalive.interval).await;
            if self.generation() != generation || !self.is_connected() {
                return;
            }
            let _guard = self.writes.lock().await;
            match self.transport.write(uuid, &payload).await {
                Ok(()) => debug!("pinged pump"),
                Err(e) => warn!("pump ping failed: {e}"),
            }
        }
    }
}

async fn within<F, V>(limit: Duration, what: &'static str, step: F) -> Result<V, PeripheralError>
where
    F: Future<Output = V>,
{
    tokio::time::timeout(limit, step)
        .await
        .map_err(|_| PeripheralError::Timeout(what, limit))
}

#[async_trait]
impl<T: PumpTransport> RewardPump for RewardPeripheral<T> {
    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    async fn pulse(&self, duration_ms: u32) -> Result<(), PeripheralError> {
        let inner = &self.inner;
        if !inner.is_connected() {
            return Err(PeripheralError::NotConnected);
        }
        let uuid = inner
            .config
            .profile
            .uuid(CharacteristicRole::PumpDuration)
            .ok_or(PeripheralError::MissingRole("pump duration"))?;
        let payload = inner.config.profile.encoding.encode(duration_ms);

        let _guard = inner.writes.lock().await;
        inner
            .transport
            .write(uuid, &payload)
            .await
            .map_err(|e| PeripheralError::WriteFailed(uuid, e))?;
        debug!("wrote pump duration {duration_ms} ms, bytes {payload:?}");
        Ok(())
    }

    async fn initialize(&self) -> bool {
        match self.scan().await {
            Ok(connected) => connected,
            Err(e) => {
                warn!("pump unavailable, continuing without physical reward: {e}");
                false
            }
        }
    }

    async fn shutdown(&self) {
        self.disconnect().await;
    }
}
