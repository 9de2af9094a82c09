#[macro_use]
pub mod logging;
pub mod connection;
pub mod serial;

pub use connection::{
    ConnectionEvent, ConnectionManager, ConnectionManagerBuilder, LinkEvent, LinkMetrics, LinkOptions, LinkStatus,
    ReceivedMessage,
};
pub use logging::LogSink;
pub use serial::{
    discover_ports, DataBits, FlowControl, HardwareFault, Parity, PortConfig, PortDriver, SerialDeviceInfo,
    SerialError, SerialPortIO, StopBits,
};
