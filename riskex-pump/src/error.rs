use std::time::Duration;

use thiserror::Error;

/// Failure reported by the wireless link itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("{0}")]
    Failed(String),

    #[error("link closed")]
    Closed,
}

impl TransportError {
    pub fn failed(msg: impl Into<String>) -> Self {
        TransportError::Failed(msg.into())
    }
}

#[derive(Debug, Error)]
pub enum PeripheralError {
    #[error("pump is not connected")]
    NotConnected,

    #[error("service {0:#06x} not found: {1}")]
    ServiceNotFound(u16, TransportError),

    #[error("characteristic {0:#06x} not found: {1}")]
    CharacteristicNotFound(u16, TransportError),

    #[error("profile has no {0} characteristic")]
    MissingRole(&'static str),

    #[error("write to {0:#06x} failed: {1}")]
    WriteFailed(u16, TransportError),

    #[error("{0} timed out after {1:?}")]
    Timeout(&'static str, Duration),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("reconnect superseded by a newer link")]
    Superseded,
}

impl PeripheralError {
    /// Whether another reconnect attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PeripheralError::Superseded | PeripheralError::MissingRole(_))
    }
}
