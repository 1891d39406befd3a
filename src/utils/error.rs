use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModbusError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Not connected to device")]
    NotConnected,

    #[error("Communication error: {0}")]
    CommunicationError(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Unexpected function code 0x{function_code:02X}")]
    ProtocolMismatch { function_code: u8 },

    #[error("Response payload too short: byte count {0}")]
    ShortPayload(u8),

    #[error("Incomplete response: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("Transaction id mismatch: sent {sent}, received {received}")]
    TransactionMismatch { sent: u16, received: u16 },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("A poll cycle is already in progress")]
    PollInProgress,
}

impl ModbusError {
    /// Short cause used in per-register error notes.
    pub fn cause(&self) -> String {
        match self {
            ModbusError::Timeout => "timeout".to_string(),
            ModbusError::ProtocolMismatch { .. } => "protocol mismatch".to_string(),
            ModbusError::ShortPayload(_) => "short payload".to_string(),
            ModbusError::ShortRead { .. } => "short read".to_string(),
            ModbusError::TransactionMismatch { .. } => "transaction mismatch".to_string(),
            ModbusError::NotConnected => "not connected".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<io::Error> for ModbusError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ModbusError::Timeout,
            _ => ModbusError::CommunicationError(format!("IO error: {}", err)),
        }
    }
}

impl From<tokio::time::error::Elapsed> for ModbusError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ModbusError::Timeout
    }
}

impl From<toml::de::Error> for ModbusError {
    fn from(err: toml::de::Error) -> Self {
        ModbusError::ConfigError(format!("TOML error: {}", err))
    }
}
