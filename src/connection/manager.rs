use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};

use super::models::{ConnectionEvent, LinkEvent, LinkMetrics, LinkStatus};
use super::options::LinkOptions;
use super::reader::{reader_loop, ReaderContext};
use super::state::LinkState;
use super::task::{LoopHandle, StopOutcome};
use super::watcher::watcher_loop;
use crate::logging::LogSink;
use crate::serial::{HardwareFault, NativeDriver, PortConfig, PortDriver, Result, SerialError, SerialPortIO};

/// The open handle. `None` once close() has disposed of it.
pub(crate) type SharedPort = Arc<Mutex<Option<Box<dyn SerialPortIO>>>>;

/// Everything that exists only while a handle is open.
#[derive(Default)]
struct Resource {
    port: Option<SharedPort>,
    reader: Option<LoopHandle>,
    fault_listener: Option<LoopHandle>,
}

pub(crate) struct LinkCore {
    driver: Arc<dyn PortDriver>,
    port_config: RwLock<PortConfig>,
    pub(crate) state: Arc<LinkState>,
    pub(crate) options: LinkOptions,
    pub(crate) log: LogSink,
    resource: Mutex<Resource>,
    watcher: Mutex<Option<LoopHandle>>,
    events_tx: broadcast::Sender<LinkEvent>,
    metrics_tx: Arc<watch::Sender<LinkMetrics>>,
}

impl LinkCore {
    pub(crate) async fn open(&self) -> Result<()> {
        let mut resource = self.resource.lock().await;
        self.open_locked(&mut resource).await
    }

    pub(crate) async fn close(&self) {
        let mut resource = self.resource.lock().await;
        self.close_locked(&mut resource).await;
    }

    async fn open_locked(&self, resource: &mut Resource) -> Result<()> {
        self.close_locked(resource).await;

        if self.state.disconnect_requested() {
            return Err(SerialError::DisconnectPending);
        }

        let config = self.port_config.read().await.clone();
        self.metrics_tx.send_modify(|m| m.open_attempts += 1);

        let mut port = match self.driver.open(&config).await {
            Ok(port) => port,
            Err(e) => {
                sink_error!(self.log, "Failed to open {}: {}", config.name, e);
                let message = e.to_string();
                self.metrics_tx.send_modify(|m| m.last_error = Some(message));
                self.close_locked(resource).await;
                return Err(e);
            }
        };

        let faults = port.take_fault_receiver();
        let shared: SharedPort = Arc::new(Mutex::new(Some(port)));
        resource.port = Some(shared.clone());
        if let Some(faults_rx) = faults {
            resource.fault_listener = Some(self.spawn_fault_listener(config.name.clone(), faults_rx));
        }

        self.state.mark_open();
        self.metrics_tx.send_modify(|m| m.opens_succeeded += 1);
        sink_info!(self.log, "Connected to {}", config);

        // A rename that landed while the driver was opening must survive mark_open().
        let configured = self.port_config.read().await.name.clone();
        if configured != config.name {
            sink_warn!(self.log, "Port changed to {} while opening {}; will reconnect", configured, config.name);
            self.state.raise_error();
        }

        // Published before the reader exists, so it precedes every message of this epoch.
        let _ = self.events_tx.send(LinkEvent::ConnectionStatusChanged(ConnectionEvent { connected: true }));

        let ctx = ReaderContext {
            port: shared,
            port_name: config.name,
            state: self.state.clone(),
            events_tx: self.events_tx.clone(),
            metrics_tx: self.metrics_tx.clone(),
            options: self.options.clone(),
            log: self.log.clone(),
        };
        resource.reader = Some(LoopHandle::spawn("reader", |stop_rx| reader_loop(ctx, stop_rx)));

        Ok(())
    }

    async fn close_locked(&self, resource: &mut Resource) {
        let join_timeout = self.options.join_timeout();

        if let Some(reader) = resource.reader.take() {
            if reader.shutdown(join_timeout, &self.log).await == StopOutcome::Aborted {
                sink_warn!(self.log, "Reader had to be aborted during close");
            }
        }
        if let Some(listener) = resource.fault_listener.take() {
            listener.shutdown(join_timeout, &self.log).await;
        }

        if let Some(shared) = resource.port.take() {
            let mut slot = shared.lock().await;
            if let Some(mut port) = slot.take() {
                self.state.mark_closed();
                if let Err(e) = port.close().await {
                    sink_warn!(self.log, "Error while closing {}: {}", port.name(), e);
                }
                sink_info!(self.log, "Closed {}", port.name());
                let _ = self.events_tx.send(LinkEvent::ConnectionStatusChanged(ConnectionEvent { connected: false }));
                drop(port);
            }
        }

        self.state.mark_closed();
    }

    fn spawn_fault_listener(
        &self,
        port_name: String,
        mut faults_rx: mpsc::UnboundedReceiver<HardwareFault>,
    ) -> LoopHandle {
        let state = self.state.clone();
        let metrics_tx = self.metrics_tx.clone();
        let log = self.log.clone();
        let raises_error = self.options.fault_raises_error;

        LoopHandle::spawn("fault listener", move |mut stop_rx| async move {
            loop {
                tokio::select! {
                    _ = stop_rx.recv() => break,
                    fault = faults_rx.recv() => {
                        let Some(fault) = fault else { break };
                        sink_warn!(log, "Hardware fault on {}: {}", port_name, fault);
                        let message = fault.to_string();
                        metrics_tx.send_modify(|m| {
                            m.hardware_faults += 1;
                            m.last_error = Some(message);
                        });
                        if raises_error {
                            state.raise_error();
                        }
                    }
                }
            }
        })
    }

    /// Start the watcher unless one is alive or a disconnect is under way.
    async fn ensure_watcher(self: &Arc<Self>) {
        let mut slot = self.watcher.lock().await;
        if self.state.disconnect_requested() {
            return;
        }
        if slot.as_ref().is_some_and(|w| !w.is_finished()) {
            return;
        }

        let link = Arc::downgrade(self);
        *slot = Some(LoopHandle::spawn("watcher", move |stop_rx| watcher_loop(link, stop_rx)));
    }
}

/// Keeps one serial link alive.
///
/// `connect` opens the port and starts a watcher that recycles the link
/// whenever it breaks, until `disconnect` is called. Incoming bytes and
/// status changes are published to every [`subscribe`](Self::subscribe)r.
/// No method returns an error: failures show up as `false`, as status
/// events, and in the log.
#[derive(Clone)]
pub struct ConnectionManager {
    core: Arc<LinkCore>,
}

impl ConnectionManager {
    /// Manager over the OS serial driver with default options and the global logger.
    pub fn new(port: PortConfig) -> Self {
        ConnectionManagerBuilder::new(port).build()
    }

    pub fn builder(port: PortConfig) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder::new(port)
    }

    /// Open the port and start supervising it.
    ///
    /// Returns false right away while a disconnect is in progress. A failed
    /// first open still starts the watcher, which keeps retrying.
    pub async fn connect(&self) -> bool {
        if self.core.state.disconnect_requested() {
            sink_debug!(self.core.log, "Connect ignored: disconnect in progress");
            return false;
        }

        {
            let mut resource = self.core.resource.lock().await;
            if let Err(e) = self.core.open_locked(&mut resource).await {
                sink_warn!(self.core.log, "Initial connection failed ({}); will keep retrying", e);
            }
            self.core.ensure_watcher().await;
        }

        self.is_connected()
    }

    /// Close the port and stop the watcher. Concurrent calls collapse into
    /// the first one.
    pub async fn disconnect(&self) {
        if !self.core.state.begin_disconnect() {
            sink_debug!(self.core.log, "Disconnect already in progress");
            return;
        }

        sink_info!(self.core.log, "Disconnecting");
        self.core.close().await;

        let watcher = self.core.watcher.lock().await.take();
        if let Some(watcher) = watcher {
            if watcher.shutdown(self.core.options.join_timeout(), &self.core.log).await == StopOutcome::Aborted {
                sink_warn!(self.core.log, "Watcher had to be aborted during disconnect");
            }
        }

        self.core.state.end_disconnect();
        sink_info!(self.core.log, "Disconnected");
    }

    /// Replace the port settings used by the next open.
    ///
    /// A new port name flags the link as broken so the watcher moves over to
    /// it on its next cycle; other changes wait for the next reconnect.
    pub async fn set_port(&self, config: PortConfig) {
        let mut current = self.core.port_config.write().await;
        let renamed = current.name != config.name;
        sink_info!(self.core.log, "Port configuration set to {}", config);
        *current = config;

        if renamed {
            self.core.state.raise_error();
        }
    }

    pub async fn port_config(&self) -> PortConfig {
        self.core.port_config.read().await.clone()
    }

    /// Write `data` to the device. False when not connected or the write fails.
    pub async fn send_message(&self, data: &[u8]) -> bool {
        if !self.is_connected() {
            return false;
        }

        let port = self.core.resource.lock().await.port.clone();
        let Some(port) = port else { return false };

        let result = {
            let mut slot = port.lock().await;
            match slot.as_mut() {
                Some(handle) => handle.send_data(data, self.core.options.write_timeout()).await,
                None => Err(SerialError::NotConnected),
            }
        };

        match result {
            Ok(written) => {
                sink_debug!(self.core.log, "Sent {} bytes: {}", written, hex::encode(data));
                self.core.metrics_tx.send_modify(|m| m.bytes_sent += written as u64);
                true
            }
            Err(e) => {
                sink_error!(self.core.log, "Write failed: {}", e);
                let message = e.to_string();
                self.core.metrics_tx.send_modify(|m| {
                    m.write_failures += 1;
                    m.last_error = Some(message);
                });
                // NotConnected means the handle was recycled under us; the new one is fine.
                let stale = matches!(e, SerialError::NotConnected);
                if self.core.options.write_failure_raises_error && !stale {
                    self.core.state.raise_error();
                }
                false
            }
        }
    }

    /// Handle present, no error, no disconnect in progress.
    pub fn is_connected(&self) -> bool {
        self.core.state.is_connected()
    }

    pub async fn status(&self) -> LinkStatus {
        LinkStatus {
            port_name: self.core.port_config.read().await.name.clone(),
            connected: self.core.state.is_connected(),
            has_error: self.core.state.has_error(),
            disconnect_requested: self.core.state.disconnect_requested(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.core.events_tx.subscribe()
    }

    pub fn metrics_receiver(&self) -> watch::Receiver<LinkMetrics> {
        self.core.metrics_tx.subscribe()
    }

    /// Wait until the link is up, polling at the reader's interval.
    /// Returns false if `limit` passes first.
    pub async fn wait_connected(&self, limit: std::time::Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while !self.is_connected() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.core.options.poll_interval()).await;
        }
        true
    }
}

pub struct ConnectionManagerBuilder {
    pub port: PortConfig,
    pub driver: Arc<dyn PortDriver>,
    pub options: LinkOptions,
    pub log: LogSink,
}

impl ConnectionManagerBuilder {
    pub fn new(port: PortConfig) -> Self {
        Self {
            port,
            driver: Arc::new(NativeDriver),
            options: LinkOptions::default(),
            log: LogSink::global(),
        }
    }

    pub fn driver(mut self, driver: Arc<dyn PortDriver>) -> Self {
        self.driver = driver;
        self
    }

    pub fn options(mut self, options: LinkOptions) -> Self {
        self.options = options;
        self
    }

    pub fn logger(mut self, log: LogSink) -> Self {
        self.log = log;
        self
    }

    pub fn build(self) -> ConnectionManager {
        let (events_tx, _events_rx) = broadcast::channel(self.options.event_capacity.max(1));
        let (metrics_tx, _metrics_rx) = watch::channel(LinkMetrics::default());

        let core = LinkCore {
            driver: self.driver,
            port_config: RwLock::new(self.port),
            state: Arc::new(LinkState::new()),
            options: self.options,
            log: self.log,
            resource: Mutex::new(Resource::default()),
            watcher: Mutex::new(None),
            events_tx,
            metrics_tx: Arc::new(metrics_tx),
        };

        ConnectionManager { core: Arc::new(core) }
    }
}
