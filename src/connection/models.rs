use serde::{Deserialize, Serialize};

/// Link came up or went down.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub connected: bool,
}

/// One chunk of bytes drained from the device. No framing is applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub data: Vec<u8>,
}

/// Everything a subscriber can observe, in production order.
///
/// Status changes and messages share one channel so that the connected
/// event of an epoch is always seen before that epoch's first message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum LinkEvent {
    ConnectionStatusChanged(ConnectionEvent),
    MessageReceived(ReceivedMessage),
}

/// Point-in-time view of the connection flags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkStatus {
    pub port_name: String,
    pub connected: bool,
    pub has_error: bool,
    pub disconnect_requested: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct LinkMetrics {
    pub open_attempts: u64,
    pub opens_succeeded: u64,
    pub messages_received: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub read_failures: u64,
    pub write_failures: u64,
    pub hardware_faults: u64,
    pub last_error: Option<String>,
}
