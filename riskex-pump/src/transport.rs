use async_trait::async_trait;

use crate::error::TransportError;

/// Which advertised devices the user is offered during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceFilter {
    NamePrefix(String),
    AcceptAll,
}

impl DeviceFilter {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            DeviceFilter::NamePrefix(prefix) => name.starts_with(prefix.as_str()),
            DeviceFilter::AcceptAll => true,
        }
    }
}

impl Default for DeviceFilter {
    fn default() -> Self {
        DeviceFilter::NamePrefix("BLENano_".into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
}

/// Wireless link primitives the peripheral is built on.
///
/// One transport drives one device at a time. `closed` resolves when the
/// currently open link drops on its own (hardware-initiated disconnect).
#[async_trait]
pub trait PumpTransport: Send + Sync + 'static {
    /// Lets the user pick one device. `Ok(None)` means nothing was picked.
    async fn request_device(
        &self,
        filter: &DeviceFilter,
    ) -> Result<Option<DeviceInfo>, TransportError>;

    async fn open(&self, device: &DeviceInfo) -> Result<(), TransportError>;

    async fn resolve_service(&self, service: u16) -> Result<(), TransportError>;

    async fn resolve_characteristic(
        &self,
        service: u16,
        characteristic: u16,
    ) -> Result<(), TransportError>;

    async fn write(&self, characteristic: u16, payload: &[u8]) -> Result<(), TransportError>;

    async fn closed(&self);

    async fn close(&self) {}
}
