use std::sync::atomic::{AtomicBool, Ordering};

/// Connection flags shared by the manager, the reader and the watcher.
///
/// `has_error` starts out raised and is raised again whenever the handle is
/// dropped, so "no handle" always reads as an error state.
#[derive(Debug)]
pub(crate) struct LinkState {
    port_open: AtomicBool,
    has_error: AtomicBool,
    disconnect_requested: AtomicBool,
}

impl LinkState {
    pub(crate) fn new() -> Self {
        Self {
            port_open: AtomicBool::new(false),
            has_error: AtomicBool::new(true),
            disconnect_requested: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.port_open.load(Ordering::Acquire)
            && !self.has_error.load(Ordering::Acquire)
            && !self.disconnect_requested.load(Ordering::Acquire)
    }

    pub(crate) fn has_error(&self) -> bool {
        self.has_error.load(Ordering::Acquire)
    }

    pub(crate) fn raise_error(&self) {
        self.has_error.store(true, Ordering::Release);
    }

    /// Only legal while a handle is held.
    pub(crate) fn mark_open(&self) {
        self.port_open.store(true, Ordering::Release);
        self.has_error.store(false, Ordering::Release);
    }

    pub(crate) fn mark_closed(&self) {
        self.port_open.store(false, Ordering::Release);
        self.has_error.store(true, Ordering::Release);
    }

    pub(crate) fn disconnect_requested(&self) -> bool {
        self.disconnect_requested.load(Ordering::Acquire)
    }

    /// Returns false if another disconnect already owns the teardown.
    pub(crate) fn begin_disconnect(&self) -> bool {
        self.disconnect_requested
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn end_disconnect(&self) {
        self.disconnect_requested.store(false, Ordering::Release);
    }
}
