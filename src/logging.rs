//! Injected log sink.
//!
//! The connection layer never writes to the process-wide logger directly;
//! it logs through the `LogSink` it was built with. `LogSink::global()`
//! forwards to whatever `log` backend the application installed.
use std::fmt;
use std::sync::Arc;

use log::{Level, Log, Record};

pub const DEFAULT_TARGET: &str = "serial_link";

#[derive(Clone)]
pub struct LogSink {
    logger: Option<Arc<dyn Log>>,
    target: &'static str,
}

impl LogSink {
    /// Forward records to the logger installed with `log::set_logger`.
    pub fn global() -> Self {
        Self { logger: None, target: DEFAULT_TARGET }
    }

    pub fn new(logger: Arc<dyn Log>) -> Self {
        Self { logger: Some(logger), target: DEFAULT_TARGET }
    }

    pub fn with_target(mut self, target: &'static str) -> Self {
        self.target = target;
        self
    }

    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        let record = Record::builder()
            .args(args)
            .level(level)
            .target(self.target)
            .module_path_static(Some(module_path!()))
            .build();

        match &self.logger {
            Some(logger) => {
                if logger.enabled(record.metadata()) {
                    logger.log(&record);
                }
            }
            None => {
                if level <= log::max_level() {
                    let logger = log::logger();
                    if logger.enabled(record.metadata()) {
                        logger.log(&record);
                    }
                }
            }
        }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::global()
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSink")
            .field("target", &self.target)
            .field("injected", &self.logger.is_some())
            .finish()
    }
}

macro_rules! sink_log {
    ($sink:expr, $level:expr, $($arg:tt)+) => {
        $sink.log($level, format_args!($($arg)+))
    };
}

macro_rules! sink_error {
    ($sink:expr, $($arg:tt)+) => { sink_log!($sink, ::log::Level::Error, $($arg)+) };
}

macro_rules! sink_warn {
    ($sink:expr, $($arg:tt)+) => { sink_log!($sink, ::log::Level::Warn, $($arg)+) };
}

macro_rules! sink_info {
    ($sink:expr, $($arg:tt)+) => { sink_log!($sink, ::log::Level::Info, $($arg)+) };
}

macro_rules! sink_debug {
    ($sink:expr, $($arg:tt)+) => { sink_log!($sink, ::log::Level::Debug, $($arg)+) };
}
