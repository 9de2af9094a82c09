//! Supervisory loop: notices a broken link and cycles it closed and open.
use std::sync::Weak;

use tokio::sync::mpsc;

use super::manager::LinkCore;
use super::task::{sleep_or_stop, stop_requested};

/// Runs until a disconnect is requested, a stop arrives, or the manager is
/// dropped. Reopen attempts repeat at a fixed interval with no cap.
pub(crate) async fn watcher_loop(link: Weak<LinkCore>, mut stop_rx: mpsc::Receiver<()>) {
    loop {
        let Some(core) = link.upgrade() else { break };

        if core.state.disconnect_requested() || stop_requested(&mut stop_rx) {
            break;
        }

        if core.state.has_error() {
            sink_debug!(core.log, "Link error detected; recycling connection");
            core.close().await;

            if sleep_or_stop(&mut stop_rx, core.options.reopen_delay()).await {
                break;
            }

            if !core.state.disconnect_requested() {
                match core.open().await {
                    Ok(()) => sink_info!(core.log, "Reconnected"),
                    Err(e) => sink_warn!(core.log, "Reconnect failed: {}", e),
                }
            }
        }

        if core.state.disconnect_requested() {
            break;
        }

        let cadence = core.options.watch_interval();
        drop(core);
        if sleep_or_stop(&mut stop_rx, cadence).await {
            break;
        }
    }
}
