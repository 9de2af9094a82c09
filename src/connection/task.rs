use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use crate::logging::LogSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopOutcome {
    Graceful,
    Aborted,
}

/// A background loop plus the channel used to ask it to stop.
pub(crate) struct LoopHandle {
    name: &'static str,
    stop_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl LoopHandle {
    pub(crate) fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(mpsc::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let task = tokio::spawn(body(stop_rx));
        Self { name, stop_tx, task }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the loop, wait up to `wait` for it to return, then abort it.
    pub(crate) async fn shutdown(self, wait: Duration, log: &LogSink) -> StopOutcome {
        let Self { name, stop_tx, mut task } = self;
        let _ = stop_tx.try_send(());

        match timeout(wait, &mut task).await {
            Ok(Ok(())) => StopOutcome::Graceful,
            Ok(Err(e)) => {
                if e.is_panic() {
                    sink_error!(log, "{} loop panicked: {}", name, e);
                }
                StopOutcome::Graceful
            }
            Err(_) => {
                sink_warn!(log, "{} loop did not stop within {:?}; aborting", name, wait);
                task.abort();
                let _ = timeout(wait, task).await;
                StopOutcome::Aborted
            }
        }
    }
}

/// True once a stop was sent or the owning handle is gone.
pub(crate) fn stop_requested(stop_rx: &mut mpsc::Receiver<()>) -> bool {
    !matches!(stop_rx.try_recv(), Err(TryRecvError::Empty))
}

/// Sleep for `delay` unless a stop arrives first. Returns true on stop.
pub(crate) async fn sleep_or_stop(stop_rx: &mut mpsc::Receiver<()>, delay: Duration) -> bool {
    tokio::select! {
        _ = stop_rx.recv() => true,
        _ = sleep(delay) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cooperative_loop_stops_gracefully() {
        let handle = LoopHandle::spawn("test", |mut stop_rx| async move {
            loop {
                if sleep_or_stop(&mut stop_rx, Duration::from_millis(10)).await {
                    break;
                }
            }
        });

        let outcome = handle.shutdown(Duration::from_millis(500), &LogSink::global()).await;
        assert_eq!(outcome, StopOutcome::Graceful);
    }

    #[tokio::test]
    async fn test_stubborn_loop_is_aborted() {
        let handle = LoopHandle::spawn("stubborn", |_stop_rx| async move {
            sleep(Duration::from_secs(60)).await;
        });

        let outcome = handle.shutdown(Duration::from_millis(50), &LogSink::global()).await;
        assert_eq!(outcome, StopOutcome::Aborted);
    }

    #[tokio::test]
    async fn test_stop_requested_after_handle_dropped() {
        let (tx, mut rx) = mpsc::channel::<()>(1);
        assert!(!stop_requested(&mut rx));
        drop(tx);
        assert!(stop_requested(&mut rx));
    }
}
