//! # policy-watcher
//!
//! Policy change notifications for authorization enforcers, relayed through a
//! publish/subscribe broker.
//!
//! ## Overview
//!
//! Several processes each run their own policy enforcer. When one of them
//! changes the policy it calls [`Watcher::update`](core::Watcher::update),
//! which publishes a short message on a broker channel. Every other watcher
//! subscribed to that channel invokes its update callback, and the host
//! reloads its policy.
//!
//! - Two long-lived broker connections per watcher, one for publishing and
//!   one for subscribing
//! - Background reconnects with a fixed retry delay
//! - Optional suppression of self-originated notifications
//! - Optional squashing of notification bursts into one trailing callback
//! - Per-operation metrics records through a pluggable sink
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use policy_watcher::prelude::*;
//! use policy_watcher::options;
//!
//! # async fn example() -> policy_watcher::error::Result<()> {
//! let watcher = Watcher::open(
//!     "127.0.0.1:6379",
//!     [options::channel("/casbin"), options::ignore_self(true)],
//! )
//! .await?;
//!
//! watcher.set_update_callback(|_msg| {
//!     // reload the policy
//! });
//!
//! watcher.update().await?;
//! watcher.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `redis` (default): the Redis transport
//! - `metrics`: an OpenTelemetry metrics sink
//!
//! Delivery is at-most-once. Notifications published while a watcher is
//! reconnecting are lost.

#![warn(missing_docs, rust_2024_compatibility)]
#![deny(unsafe_code)]

pub mod broker;
pub mod core;
pub mod error;
pub mod metrics;
pub mod notify;

pub use crate::core::options;

/// Convenient re-exports for common usage patterns.
pub mod prelude {
    pub use crate::core::{PolicyWatcher, Watcher, WatcherBuilder, WatcherOption, WatcherOptions};
    pub use crate::error::{Result, WatcherError};
    pub use crate::metrics::{MetricOp, MetricsSink, WatcherMetrics};
}
