use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::TransportError;
use crate::transport::{DeviceFilter, DeviceInfo, PumpTransport};

/// One write seen by the loopback device.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    pub characteristic: u16,
    pub payload: Vec<u8>,
    pub started: Instant,
    pub finished: Instant,
}

#[derive(Debug, Default)]
struct Faults {
    open_failures: u32,
    write_failures: u32,
    missing_service: bool,
    missing_characteristics: HashSet<u16>,
    write_latency: Duration,
}

#[derive(Debug)]
struct Device {
    info: Option<DeviceInfo>,
    link: watch::Sender<bool>,
    faults: Mutex<Faults>,
    opens: Mutex<Vec<Instant>>,
    writes: Mutex<Vec<WriteRecord>>,
}

/// In-process pump controller used for dry runs and tests.
///
/// Accepts every write after `write_latency`, and can be told to refuse
/// links, hide GATT entries, fail writes or drop the link.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    device: Arc<Device>,
}

impl LoopbackTransport {
    pub fn new(name: &str) -> Self {
        Self::build(Some(DeviceInfo {
            id: format!("loopback:{name}"),
            name: name.to_string(),
        }))
    }

    /// A scan on this transport never selects a device.
    pub fn without_device() -> Self {
        Self::build(None)
    }

    fn build(info: Option<DeviceInfo>) -> Self {
        let (link, _) = watch::channel(false);
        Self {
            device: Arc::new(Device {
                info,
                link,
                faults: Mutex::new(Faults::default()),
                opens: Mutex::new(Vec::new()),
                writes: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Every write takes `latency` before it is acknowledged.
    pub fn with_write_latency(self, latency: Duration) -> Self {
        self.device.faults.lock().write_latency = latency;
        self
    }

    /// The next `n` link attempts fail.
    pub fn fail_opens(&self, n: u32) {
        self.device.faults.lock().open_failures = n;
    }

    /// The next `n` writes fail.
    pub fn fail_writes(&self, n: u32) {
        self.device.faults.lock().write_failures = n;
    }

    pub fn hide_service(&self) {
        self.device.faults.lock().missing_service = true;
    }

    pub fn hide_characteristic(&self, uuid: u16) {
        self.device.faults.lock().missing_characteristics.insert(uuid);
    }

    /// Simulates the hardware dropping the link.
    pub fn drop_link(&self) {
        debug!("loopback: dropping link");
        self.device.link.send_replace(false);
    }

    pub fn is_linked(&self) -> bool {
        *self.device.link.borrow()
    }

    /// When each link attempt was made.
    pub fn open_attempts(&self) -> Vec<Instant> {
        self.device.opens.lock().clone()
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.device.writes.lock().clone()
    }

    pub fn writes_to(&self, characteristic: u16) -> Vec<WriteRecord> {
        self.writes()
            .into_iter()
            .filter(|w| w.characteristic == characteristic)
            .collect()
    }
}

#[async_trait]
impl PumpTransport for LoopbackTransport {
    async fn request_device(
        &self,
        filter: &DeviceFilter,
    ) -> Result<Option<DeviceInfo>, TransportError> {
        Ok(self
            .device
            .info
            .clone()
            .filter(|info| filter.matches(&info.name)))
    }

    async fn open(&self, device: &DeviceInfo) -> Result<(), TransportError> {
        self.device.opens.lock().push(Instant::now());
        {
            let mut faults = self.device.faults.lock();
            if faults.open_failures > 0 {
                faults.open_failures -= 1;
                return Err(TransportError::failed(format!(
                    "{} is out of range",
                    device.name
                )));
            }
        }
        self.device.link.send_replace(true);
        Ok(())
    }

    async fn resolve_service(&self, service: u16) -> Result<(), TransportError> {
        if self.device.faults.lock().missing_service {
            return Err(TransportError::failed(format!(
                "no service {service:#06x}"
            )));
        }
        Ok(())
    }

    async fn resolve_characteristic(
        &self,
        _service: u16,
        characteristic: u16,
    ) -> Result<(), TransportError> {
        if self
            .device
            .faults
            .lock()
            .missing_characteristics
            .contains(&characteristic)
        {
            return Err(TransportError::failed(format!(
                "no characteristic {characteristic:#06x}"
            )));
        }
        Ok(())
    }

    async fn write(&self, characteristic: u16, payload: &[u8]) -> Result<(), TransportError> {
        if !self.is_linked() {
            return Err(TransportError::Closed);
        }
        let started = Instant::now();
        let latency = self.device.faults.lock().write_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        {
            let mut faults = self.device.faults.lock();
            if faults.write_failures > 0 {
                faults.write_failures -= 1;
                return Err(TransportError::failed("GATT operation failed"));
            }
        }
        self.device.writes.lock().push(WriteRecord {
            characteristic,
            payload: payload.to_vec(),
            started,
            finished: Instant::now(),
        });
        Ok(())
    }

    async fn closed(&self) {
        let mut link = self.device.link.subscribe();
        let _ = link.wait_for(|up| !*up).await;
    }

    async fn close(&self) {
        self.device.link.send_replace(false);
    }
}
