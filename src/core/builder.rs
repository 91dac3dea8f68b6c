//! Builder for constructing Watcher instances.

use crate::broker::{Connection, Dialer};
use crate::core::Watcher;
use crate::core::options::{self, WatcherOption};
use crate::error::{Result, WatcherError};
use crate::metrics::{MetricsSink, WatcherMetrics};
use std::sync::Arc;
use std::time::Duration;

/// Builder for constructing a `Watcher`.
///
/// A fluent front-end over the [`options`] setters: every `with_*` call
/// queues the matching option, and options are applied in call order when the
/// watcher is opened.
///
/// # Examples
///
/// ```rust,no_run
/// use policy_watcher::prelude::*;
/// use std::time::Duration;
///
/// # async fn example() -> Result<()> {
/// let watcher = Watcher::builder("127.0.0.1:6379")
///     .with_channel("/policies")
///     .with_password("secret")
///     .with_ignore_self(true)
///     .with_squash(Duration::from_millis(50), Duration::from_secs(60))
///     .open()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct WatcherBuilder {
    address: String,
    options: Vec<WatcherOption>,
}

impl WatcherBuilder {
    /// Create a new builder for a broker at `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            options: Vec::new(),
        }
    }

    /// Queue an arbitrary option.
    pub fn with_option(mut self, option: WatcherOption) -> Self {
        self.options.push(option);
        self
    }

    /// Override the channel name (default `/casbin`).
    pub fn with_channel(self, channel: impl Into<String>) -> Self {
        self.with_option(options::channel(channel))
    }

    /// Authenticate with this password.
    pub fn with_password(self, password: impl Into<String>) -> Self {
        self.with_option(options::password(password))
    }

    /// Authenticate as this ACL user.
    pub fn with_username(self, username: impl Into<String>) -> Self {
        self.with_option(options::username(username))
    }

    /// Override the transport protocol (default `tcp`).
    pub fn with_protocol(self, protocol: impl Into<String>) -> Self {
        self.with_option(options::protocol(protocol))
    }

    /// Use a caller-owned publish connection.
    pub fn with_pub_connection(self, conn: Arc<dyn Connection>) -> Self {
        self.with_option(options::with_pub_connection(conn))
    }

    /// Use a caller-owned subscribe connection.
    pub fn with_sub_connection(self, conn: Arc<dyn Connection>) -> Self {
        self.with_option(options::with_sub_connection(conn))
    }

    /// Override the instance identifier.
    pub fn with_local_id(self, id: impl Into<String>) -> Self {
        self.with_option(options::local_id(id))
    }

    /// Drop notifications this watcher published itself.
    pub fn with_ignore_self(self, ignore: bool) -> Self {
        self.with_option(options::ignore_self(ignore))
    }

    /// Enable burst squashing with the given short and long intervals.
    pub fn with_squash(self, short: Duration, long: Duration) -> Self {
        self.with_option(options::squash_messages(true))
            .with_option(options::squash_timeout_short(short))
            .with_option(options::squash_timeout_long(long))
    }

    /// Delay between subscription attempts (default 1s).
    pub fn with_reconnect_interval(self, interval: Duration) -> Self {
        self.with_option(options::reconnect_interval(interval))
    }

    /// Send a record per observed operation to `sink`.
    pub fn with_metrics_sink(self, sink: impl MetricsSink + 'static) -> Self {
        self.with_option(options::metrics_sink(sink))
    }

    /// Send a record per observed operation to `callback`.
    pub fn with_metrics_callback<F>(self, callback: F) -> Self
    where
        F: Fn(&WatcherMetrics) + Send + Sync + 'static,
    {
        self.with_option(options::metrics_callback(callback))
    }

    /// Report subscription failures to `callback`.
    pub fn with_reconnect_failure_callback<F>(self, callback: F) -> Self
    where
        F: Fn(&WatcherError) + Send + Sync + 'static,
    {
        self.with_option(options::reconnect_failure_callback(callback))
    }

    /// Open owned connections through `dialer`.
    pub fn with_dialer(self, dialer: impl Dialer + 'static) -> Self {
        self.with_option(options::with_dialer(dialer))
    }

    /// Connect and start listening.
    ///
    /// # Errors
    ///
    /// Returns an error if either connection cannot be dialed or
    /// authenticated.
    pub async fn open(self) -> Result<Watcher> {
        Watcher::open(self.address, self.options).await
    }

    /// Connect for publishing only.
    ///
    /// # Errors
    ///
    /// Returns an error if the publish connection cannot be dialed or
    /// authenticated.
    pub async fn open_publish_only(self) -> Result<Watcher> {
        Watcher::open_publish_only(self.address, self.options).await
    }
}
