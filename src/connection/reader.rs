//! Background task that drains the device while the link is up.
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};

use super::manager::SharedPort;
use super::models::{LinkEvent, LinkMetrics, ReceivedMessage};
use super::options::LinkOptions;
use super::state::LinkState;
use super::task::{sleep_or_stop, stop_requested};
use crate::logging::LogSink;
use crate::serial::{Result, SerialError};

pub(crate) struct ReaderContext {
    pub(crate) port: SharedPort,
    pub(crate) port_name: String,
    pub(crate) state: Arc<LinkState>,
    pub(crate) events_tx: broadcast::Sender<LinkEvent>,
    pub(crate) metrics_tx: Arc<watch::Sender<LinkMetrics>>,
    pub(crate) options: LinkOptions,
    pub(crate) log: LogSink,
}

pub(crate) async fn reader_loop(ctx: ReaderContext, mut stop_rx: mpsc::Receiver<()>) {
    sink_debug!(ctx.log, "Reader started for {}", ctx.port_name);

    loop {
        if stop_requested(&mut stop_rx) || !ctx.state.is_connected() {
            break;
        }

        match read_available(&ctx).await {
            Ok(Some(data)) => {
                let len = data.len() as u64;
                ctx.metrics_tx.send_modify(|m| {
                    m.messages_received += 1;
                    m.bytes_received += len;
                });
                // No subscribers is not an error.
                let _ = ctx.events_tx.send(LinkEvent::MessageReceived(ReceivedMessage { data }));
            }
            Ok(None) => {
                if sleep_or_stop(&mut stop_rx, ctx.options.poll_interval()).await {
                    break;
                }
            }
            // Handle was taken by close(); nothing to report.
            Err(SerialError::NotConnected) => break,
            Err(e) => {
                sink_error!(ctx.log, "Read from {} failed: {}", ctx.port_name, e);
                ctx.state.raise_error();
                let message = e.to_string();
                ctx.metrics_tx.send_modify(|m| {
                    m.read_failures += 1;
                    m.last_error = Some(message);
                });
                sleep_or_stop(&mut stop_rx, ctx.options.failure_cooldown()).await;
                break;
            }
        }
    }

    sink_debug!(ctx.log, "Reader stopped for {}", ctx.port_name);
}

/// One poll: `None` when nothing is waiting, otherwise exactly the bytes
/// that were reported available, read in a single bounded call.
async fn read_available(ctx: &ReaderContext) -> Result<Option<Vec<u8>>> {
    let mut slot = ctx.port.lock().await;
    let port = slot.as_mut().ok_or(SerialError::NotConnected)?;

    let available = port.bytes_to_read().await?;
    if available == 0 {
        return Ok(None);
    }

    let mut buffer = vec![0u8; available];
    port.read_exact(&mut buffer, ctx.options.read_timeout()).await?;
    Ok(Some(buffer))
}
