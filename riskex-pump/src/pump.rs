use async_trait::async_trait;

use crate::error::PeripheralError;

/// What the trial loop needs from a reward pump.
#[async_trait]
pub trait RewardPump: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Opens the pump for `duration_ms`. Fails without side effects when
    /// not connected.
    async fn pulse(&self, duration_ms: u32) -> Result<(), PeripheralError>;

    /// Best-effort connection at session start; returns whether the pump is
    /// usable. Never fails: a session can always run without a pump.
    async fn initialize(&self) -> bool {
        self.is_connected()
    }

    async fn shutdown(&self) {}
}

/// No pump attached. Every pulse is skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unplugged;

#[async_trait]
impl RewardPump for Unplugged {
    fn is_connected(&self) -> bool {
        false
    }

    async fn pulse(&self, _duration_ms: u32) -> Result<(), PeripheralError> {
        Err(PeripheralError::NotConnected)
    }
}
