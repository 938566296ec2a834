use std::time::Duration;

/// How the pump-duration characteristic expects its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationEncoding {
    /// Two bytes, little endian.
    U16Le,
    /// One byte, used by the simplified board.
    U8,
}

impl DurationEncoding {
    /// Encodes `ms`, saturating at the largest value the width can carry.
    pub fn encode(&self, ms: u32) -> Vec<u8> {
        match self {
            DurationEncoding::U16Le => (ms.min(u16::MAX as u32) as u16).to_le_bytes().to_vec(),
            DurationEncoding::U8 => vec![ms.min(u8::MAX as u32) as u8],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacteristicRole {
    /// Connection status, receives the keepalive ping.
    Connection,
    PumpDuration,
    /// Pump-opened notifications.
    PumpNotify,
    Rfid,
}

impl CharacteristicRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            CharacteristicRole::Connection => "connection",
            CharacteristicRole::PumpDuration => "pump duration",
            CharacteristicRole::PumpNotify => "pump notify",
            CharacteristicRole::Rfid => "rfid",
        }
    }
}

/// GATT layout of one hardware revision of the pump controller.
#[derive(Debug, Clone, PartialEq)]
pub struct HardwareProfile {
    pub service: u16,
    pub characteristics: Vec<(CharacteristicRole, u16)>,
    pub encoding: DurationEncoding,
    /// Upper bound for each step of establishing a link.
    pub connect_timeout: Duration,
}

impl HardwareProfile {
    /// Full board: connection, duration, pump and RFID characteristics.
    pub fn blenano() -> Self {
        Self {
            service: 0xA000,
            characteristics: vec![
                (CharacteristicRole::Connection, 0xA001),
                (CharacteristicRole::PumpDuration, 0xA002),
                (CharacteristicRole::PumpNotify, 0xA003),
                (CharacteristicRole::Rfid, 0xA004),
            ],
            encoding: DurationEncoding::U16Le,
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Board that only exposes the duration characteristic.
    pub fn simplified() -> Self {
        Self {
            characteristics: vec![(CharacteristicRole::PumpDuration, 0xA002)],
            encoding: DurationEncoding::U8,
            ..Self::blenano()
        }
    }

    pub fn uuid(&self, role: CharacteristicRole) -> Option<u16> {
        self.characteristics
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, uuid)| *uuid)
    }
}

impl Default for HardwareProfile {
    fn default() -> Self {
        Self::blenano()
    }
}

/// Periodic ping written to the connection characteristic.
#[derive(Debug, Clone, PartialEq)]
pub struct Keepalive {
    pub interval: Duration,
    pub ping_duration_ms: u32,
}

impl Default for Keepalive {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            ping_duration_ms: 200,
        }
    }
}
