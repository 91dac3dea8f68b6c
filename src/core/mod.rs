//! Core watcher types.

mod builder;
pub(crate) mod connection;
mod contract;
pub mod options;
mod watcher;

pub use builder::WatcherBuilder;
pub use contract::PolicyWatcher;
pub use options::{WatcherOption, WatcherOptions};
pub use watcher::Watcher;
