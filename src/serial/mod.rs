pub mod config;
pub mod interface;

pub use config::{DataBits, FlowControl, Parity, PortConfig, StopBits};
pub use interface::{discover_ports, HardwareFault, NativeDriver, NativePort, PortDriver, SerialPortIO};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerialDeviceInfo {
    pub port_name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Unsupported port setting: {0}")]
    Unsupported(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Communication timeout")]
    Timeout,

    #[error("Not connected")]
    NotConnected,

    #[error("Disconnect in progress")]
    DisconnectPending,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;
