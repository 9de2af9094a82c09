use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serialport::SerialPortType;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use super::{PortConfig, Result, SerialDeviceInfo, SerialError};

/// Out-of-band error reported by the device driver, independent of any
/// read or write call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardwareFault {
    Framing,
    Overrun,
    BufferOverflow,
    Parity,
    Other(String),
}

impl fmt::Display for HardwareFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HardwareFault::Framing => write!(f, "framing error"),
            HardwareFault::Overrun => write!(f, "character buffer overrun"),
            HardwareFault::BufferOverflow => write!(f, "input buffer overflow"),
            HardwareFault::Parity => write!(f, "parity error"),
            HardwareFault::Other(detail) => write!(f, "{}", detail),
        }
    }
}

/// An open device handle.
///
/// Every blocking primitive takes an explicit bound so callers never wait on
/// a stalled device indefinitely.
#[async_trait]
pub trait SerialPortIO: Send {
    fn name(&self) -> &str;

    /// Number of bytes that can be read without waiting.
    async fn bytes_to_read(&mut self) -> Result<usize>;

    /// Fill `buf` completely or fail with `SerialError::Timeout` once `limit` elapses.
    async fn read_exact(&mut self, buf: &mut [u8], limit: Duration) -> Result<()>;

    /// Write and flush `data`, returning the number of bytes written.
    async fn send_data(&mut self, data: &[u8], limit: Duration) -> Result<usize>;

    async fn close(&mut self) -> Result<()>;

    /// Hand out the hardware-fault notification channel, if the driver has one.
    /// Called once per open handle.
    fn take_fault_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<HardwareFault>> {
        None
    }
}

/// Factory for device handles.
#[async_trait]
pub trait PortDriver: Send + Sync {
    async fn open(&self, config: &PortConfig) -> Result<Box<dyn SerialPortIO>>;
}

/// OS serial driver backed by `tokio-serial`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeDriver;

#[async_trait]
impl PortDriver for NativeDriver {
    async fn open(&self, config: &PortConfig) -> Result<Box<dyn SerialPortIO>> {
        let stream = config
            .to_builder()?
            .open_native_async()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => SerialError::PortNotFound(config.name.clone()),
                _ => SerialError::ConnectionFailed(e.to_string()),
            })?;

        Ok(Box::new(NativePort {
            name: config.name.clone(),
            stream: Some(stream),
        }))
    }
}

/// Handle returned by [`NativeDriver`].
///
/// `serialport` exposes no asynchronous fault channel, so this handle never
/// reports hardware faults; errors surface through reads and writes instead.
pub struct NativePort {
    name: String,
    stream: Option<SerialStream>,
}

impl NativePort {
    fn stream(&mut self) -> Result<&mut SerialStream> {
        self.stream.as_mut().ok_or(SerialError::NotConnected)
    }
}

#[async_trait]
impl SerialPortIO for NativePort {
    fn name(&self) -> &str {
        &self.name
    }

    async fn bytes_to_read(&mut self) -> Result<usize> {
        let stream = self.stream()?;
        let available = tokio_serial::SerialPort::bytes_to_read(&*stream)?;
        Ok(available as usize)
    }

    async fn read_exact(&mut self, buf: &mut [u8], limit: Duration) -> Result<()> {
        let stream = self.stream()?;
        match timeout(limit, stream.read_exact(buf)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(SerialError::IoError(e)),
            Err(_) => Err(SerialError::Timeout),
        }
    }

    async fn send_data(&mut self, data: &[u8], limit: Duration) -> Result<usize> {
        let stream = self.stream()?;
        let write_operation = async {
            stream.write_all(data).await?;
            stream.flush().await?;
            Ok::<usize, std::io::Error>(data.len())
        };

        timeout(limit, write_operation)
            .await
            .map_err(|_| SerialError::Timeout)?
            .map_err(SerialError::IoError)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            // Best effort: pending output is discarded if the device is gone.
            let _ = stream.flush().await;
        }
        Ok(())
    }
}

/// List the serial ports the OS currently knows about.
pub fn discover_ports() -> Result<Vec<SerialDeviceInfo>> {
    let ports = serialport::available_ports()?;
    let devices = ports
        .into_iter()
        .map(|port| match port.port_type {
            SerialPortType::UsbPort(usb_info) => SerialDeviceInfo {
                port_name: port.port_name,
                vid: Some(usb_info.vid),
                pid: Some(usb_info.pid),
                serial_number: usb_info.serial_number,
                manufacturer: usb_info.manufacturer,
                product: usb_info.product,
            },
            _ => SerialDeviceInfo {
                port_name: port.port_name,
                vid: None,
                pid: None,
                serial_number: None,
                manufacturer: None,
                product: None,
            },
        })
        .collect();

    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let config = PortConfig::new("/dev/nonexistent_port_12345");
        let result = NativeDriver.open(&config).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unsupported_parity_fails_before_touching_the_os() {
        let config = PortConfig::new("/dev/nonexistent_port_12345").parity(crate::serial::Parity::Mark);
        match NativeDriver.open(&config).await {
            Err(SerialError::Unsupported(_)) => {}
            Err(other) => panic!("expected Unsupported, got {other}"),
            Ok(_) => panic!("expected open to fail"),
        }
    }

    #[test]
    fn test_fault_display() {
        assert_eq!(HardwareFault::Overrun.to_string(), "character buffer overrun");
        assert_eq!(HardwareFault::Other("break".into()).to_string(), "break");
    }
}
