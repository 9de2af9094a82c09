//! Supervised serial link: a manager that owns the open handle, a reader
//! loop that drains it, and a watcher loop that reopens it after failures.
pub mod manager;
pub mod models;
pub mod options;

mod reader;
mod state;
mod task;
mod watcher;

pub use manager::{ConnectionManager, ConnectionManagerBuilder};
pub use models::*;
pub use options::LinkOptions;
