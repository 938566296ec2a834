//! Reward pump peripheral: connection state machine, reconnect with
//! exponential backoff, keepalive ping and the pump-duration write.

pub mod backoff;
pub mod error;
pub mod loopback;
pub mod peripheral;
pub mod profile;
pub mod pump;
pub mod transport;

pub use backoff::{Backoff, retry_with_backoff, retry_with_backoff_if};
pub use error::{PeripheralError, TransportError};
pub use loopback::{LoopbackTransport, WriteRecord};
pub use peripheral::{ConnectionState, PeripheralConfig, RewardPeripheral};
pub use profile::{CharacteristicRole, DurationEncoding, HardwareProfile, Keepalive};
pub use pump::{RewardPump, Unplugged};
pub use transport::{DeviceFilter, DeviceInfo, PumpTransport};
