#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serial_link::{
    ConnectionManager, HardwareFault, LinkOptions, LogSink, PortConfig, PortDriver, SerialError, SerialPortIO,
};
use tokio::sync::mpsc;

/// Scripted device shared between the test and every handle the driver opens.
#[derive(Default)]
pub struct MockDevice {
    pub fail_open: AtomicBool,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    /// Report pending bytes that never arrive, so bounded reads time out.
    pub stall_reads: AtomicBool,
    /// Writes fail as if the handle had already been disposed.
    pub writes_report_closed: AtomicBool,
    pub is_open: AtomicBool,
    pub close_delay_ms: AtomicU64,
    pub open_delay_ms: AtomicU64,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub incoming: Mutex<VecDeque<u8>>,
    pub written: Mutex<Vec<u8>>,
    pub opened_with: Mutex<Vec<PortConfig>>,
    fault_tx: Mutex<Option<mpsc::UnboundedSender<HardwareFault>>>,
}

impl MockDevice {
    pub fn push_incoming(&self, data: &[u8]) {
        self.incoming.lock().unwrap().extend(data.iter().copied());
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    pub fn last_opened_name(&self) -> Option<String> {
        self.opened_with.lock().unwrap().last().map(|c| c.name.clone())
    }

    pub fn raise_fault(&self, fault: HardwareFault) -> bool {
        match self.fault_tx.lock().unwrap().as_ref() {
            Some(tx) => tx.send(fault).is_ok(),
            None => false,
        }
    }
}

pub struct MockDriver {
    pub device: Arc<MockDevice>,
}

#[async_trait::async_trait]
impl PortDriver for MockDriver {
    async fn open(&self, config: &PortConfig) -> Result<Box<dyn SerialPortIO>, SerialError> {
        let delay = self.device.open_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.device.fail_open.load(Ordering::SeqCst) {
            return Err(SerialError::PortNotFound(config.name.clone()));
        }
        self.device.opens.fetch_add(1, Ordering::SeqCst);
        self.device.is_open.store(true, Ordering::SeqCst);
        self.device.opened_with.lock().unwrap().push(config.clone());
        Ok(Box::new(MockPort { name: config.name.clone(), device: self.device.clone() }))
    }
}

pub struct MockPort {
    name: String,
    device: Arc<MockDevice>,
}

fn broken_pipe() -> SerialError {
    SerialError::IoError(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"))
}

#[async_trait::async_trait]
impl SerialPortIO for MockPort {
    fn name(&self) -> &str {
        &self.name
    }

    async fn bytes_to_read(&mut self) -> Result<usize, SerialError> {
        if self.device.fail_reads.load(Ordering::SeqCst) {
            return Err(broken_pipe());
        }
        let pending = self.device.incoming.lock().unwrap().len();
        if self.device.stall_reads.load(Ordering::SeqCst) {
            return Ok(pending.max(4));
        }
        Ok(pending)
    }

    async fn read_exact(&mut self, buf: &mut [u8], limit: Duration) -> Result<(), SerialError> {
        if self.device.fail_reads.load(Ordering::SeqCst) {
            return Err(broken_pipe());
        }
        if self.device.stall_reads.load(Ordering::SeqCst) {
            tokio::time::sleep(limit).await;
            return Err(SerialError::Timeout);
        }
        let mut incoming = self.device.incoming.lock().unwrap();
        if incoming.len() < buf.len() {
            return Err(SerialError::Timeout);
        }
        for byte in buf.iter_mut() {
            *byte = incoming.pop_front().unwrap();
        }
        Ok(())
    }

    async fn send_data(&mut self, data: &[u8], _limit: Duration) -> Result<usize, SerialError> {
        if self.device.fail_writes.load(Ordering::SeqCst) {
            return Err(broken_pipe());
        }
        if self.device.writes_report_closed.load(Ordering::SeqCst) {
            return Err(SerialError::NotConnected);
        }
        self.device.written.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    async fn close(&mut self) -> Result<(), SerialError> {
        let delay = self.device.close_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.device.closes.fetch_add(1, Ordering::SeqCst);
        self.device.is_open.store(false, Ordering::SeqCst);
        *self.device.fault_tx.lock().unwrap() = None;
        Ok(())
    }

    fn take_fault_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<HardwareFault>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.device.fault_tx.lock().unwrap() = Some(tx);
        Some(rx)
    }
}

/// Millisecond-scale timings so recovery tests finish quickly.
pub fn fast_options() -> LinkOptions {
    LinkOptions {
        poll_interval_ms: 5,
        read_timeout_ms: 50,
        write_timeout_ms: 50,
        failure_cooldown_ms: 10,
        watch_interval_ms: 20,
        reopen_delay_ms: 10,
        join_timeout_ms: 500,
        ..LinkOptions::default()
    }
}

pub fn manager_with(options: LinkOptions, log: LogSink) -> (ConnectionManager, Arc<MockDevice>) {
    let device = Arc::new(MockDevice::default());
    let manager = ConnectionManager::builder(PortConfig::new("mock0"))
        .driver(Arc::new(MockDriver { device: device.clone() }))
        .options(options)
        .logger(log)
        .build();
    (manager, device)
}

pub fn mock_manager() -> (ConnectionManager, Arc<MockDevice>) {
    manager_with(fast_options(), LogSink::global())
}

/// Poll `condition` every few milliseconds until it holds or `limit` passes.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    condition()
}

#[derive(Default)]
pub struct CaptureLogger {
    pub records: Mutex<Vec<String>>,
}

impl CaptureLogger {
    pub fn contains(&self, needle: &str) -> bool {
        self.records.lock().unwrap().iter().any(|r| r.contains(needle))
    }
}

impl log::Log for CaptureLogger {
    fn enabled(&self, _metadata: &log::Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &log::Record<'_>) {
        self.records.lock().unwrap().push(record.args().to_string());
    }

    fn flush(&self) {}
}
