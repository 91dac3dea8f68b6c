//! Watcher options and the setter functions that build them.
//!
//! Each setter returns a [`WatcherOption`] that changes exactly one field.
//! Options are applied after the defaults, in the order given, so later
//! options win. No option validates its input: an empty channel or a bogus
//! protocol is accepted here and only fails once the broker is involved.
//!
//! ```rust
//! use policy_watcher::core::options::{self, WatcherOptions};
//! use std::time::Duration;
//!
//! let opts = WatcherOptions::default().apply([
//!     options::channel("/policies"),
//!     options::squash_messages(true),
//!     options::squash_timeout_short(Duration::from_millis(5)),
//! ]);
//! assert_eq!(opts.channel, "/policies");
//! ```

use crate::broker::{Connection, Credential, Dialer};
use crate::error::WatcherError;
use crate::metrics::{MetricsSink, WatcherMetrics};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default channel name.
pub const DEFAULT_CHANNEL: &str = "/casbin";

/// Default transport protocol.
pub const DEFAULT_PROTOCOL: &str = "tcp";

/// Default short debounce interval, used while a squashed delivery is pending.
pub const DEFAULT_SQUASH_TIMEOUT_SHORT: Duration = Duration::from_millis(1);

/// Default long debounce interval, used while nothing is pending.
pub const DEFAULT_SQUASH_TIMEOUT_LONG: Duration = Duration::from_secs(60);

/// Default delay between subscription attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Callback invoked when the subscription supervisor fails to (re)subscribe,
/// or when the update callback panics.
pub type ReconnectFailureCallback = Arc<dyn Fn(&WatcherError) + Send + Sync>;

/// Effective configuration of a watcher.
#[derive(Clone)]
pub struct WatcherOptions {
    /// Channel used for change notifications.
    pub channel: String,
    /// Transport protocol passed to the dialer.
    pub protocol: String,
    /// ACL user name sent with `AUTH`.
    pub username: Option<String>,
    /// Password sent with `AUTH`. An empty password disables authentication.
    pub password: Option<String>,
    /// Caller-owned publish connection.
    pub pub_connection: Option<Arc<dyn Connection>>,
    /// Caller-owned subscribe connection.
    pub sub_connection: Option<Arc<dyn Connection>>,
    /// Instance identifier, published as the payload of every update.
    pub local_id: String,
    /// Drop notifications whose payload equals `local_id`.
    pub ignore_self: bool,
    /// Collapse bursts of notifications into one callback.
    pub squash_messages: bool,
    /// Quiet period that ends a burst.
    pub squash_timeout_short: Duration,
    /// Idle wait while nothing is pending.
    pub squash_timeout_long: Duration,
    /// Delay between subscription attempts.
    pub reconnect_interval: Duration,
    /// Receives a record per observed operation.
    pub metrics_sink: Option<Arc<dyn MetricsSink>>,
    /// Receives every subscription failure.
    pub reconnect_failure: Option<ReconnectFailureCallback>,
    /// Opens connections the watcher owns. Defaults to Redis.
    pub dialer: Option<Arc<dyn Dialer>>,
}

impl WatcherOptions {
    /// Apply options in order.
    pub fn apply(mut self, options: impl IntoIterator<Item = WatcherOption>) -> Self {
        for option in options {
            option.apply(&mut self);
        }
        self
    }

    /// The credential to authenticate with, if a non-empty password is set.
    pub fn credential(&self) -> Option<Credential> {
        match self.password.as_deref() {
            Some(password) if !password.is_empty() => Some(Credential {
                username: self.username.clone().filter(|u| !u.is_empty()),
                password: password.to_string(),
            }),
            _ => None,
        }
    }
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_string(),
            protocol: DEFAULT_PROTOCOL.to_string(),
            username: None,
            password: None,
            pub_connection: None,
            sub_connection: None,
            local_id: uuid::Uuid::new_v4().to_string(),
            ignore_self: false,
            squash_messages: false,
            squash_timeout_short: DEFAULT_SQUASH_TIMEOUT_SHORT,
            squash_timeout_long: DEFAULT_SQUASH_TIMEOUT_LONG,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            metrics_sink: None,
            reconnect_failure: None,
            dialer: None,
        }
    }
}

impl fmt::Debug for WatcherOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherOptions")
            .field("channel", &self.channel)
            .field("protocol", &self.protocol)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("pub_connection", &self.pub_connection.is_some())
            .field("sub_connection", &self.sub_connection.is_some())
            .field("local_id", &self.local_id)
            .field("ignore_self", &self.ignore_self)
            .field("squash_messages", &self.squash_messages)
            .field("squash_timeout_short", &self.squash_timeout_short)
            .field("squash_timeout_long", &self.squash_timeout_long)
            .field("reconnect_interval", &self.reconnect_interval)
            .field("metrics_sink", &self.metrics_sink.is_some())
            .field("reconnect_failure", &self.reconnect_failure.is_some())
            .field("dialer", &self.dialer.is_some())
            .finish()
    }
}

/// A single named change to [`WatcherOptions`].
pub struct WatcherOption(Box<dyn FnOnce(&mut WatcherOptions) + Send>);

impl WatcherOption {
    /// Wrap an arbitrary setter.
    pub fn new<F>(setter: F) -> Self
    where
        F: FnOnce(&mut WatcherOptions) + Send + 'static,
    {
        Self(Box::new(setter))
    }

    /// Apply this option.
    pub fn apply(self, options: &mut WatcherOptions) {
        (self.0)(options)
    }
}

impl fmt::Debug for WatcherOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WatcherOption(..)")
    }
}

/// Override the channel name.
pub fn channel(name: impl Into<String>) -> WatcherOption {
    let name = name.into();
    WatcherOption::new(move |o| o.channel = name)
}

/// Authenticate with this password.
pub fn password(password: impl Into<String>) -> WatcherOption {
    let password = password.into();
    WatcherOption::new(move |o| o.password = Some(password))
}

/// Authenticate as this ACL user.
pub fn username(username: impl Into<String>) -> WatcherOption {
    let username = username.into();
    WatcherOption::new(move |o| o.username = Some(username))
}

/// Override the transport protocol.
pub fn protocol(protocol: impl Into<String>) -> WatcherOption {
    let protocol = protocol.into();
    WatcherOption::new(move |o| o.protocol = protocol)
}

/// Use a caller-owned connection for publishing.
///
/// The watcher never redials or closes it.
pub fn with_pub_connection(conn: Arc<dyn Connection>) -> WatcherOption {
    WatcherOption::new(move |o| o.pub_connection = Some(conn))
}

/// Use a caller-owned connection for subscribing.
///
/// The watcher never redials or closes it.
pub fn with_sub_connection(conn: Arc<dyn Connection>) -> WatcherOption {
    WatcherOption::new(move |o| o.sub_connection = Some(conn))
}

/// Use caller-owned connections for both sides.
pub fn with_connections(publish: Arc<dyn Connection>, subscribe: Arc<dyn Connection>) -> WatcherOption {
    WatcherOption::new(move |o| {
        o.pub_connection = Some(publish);
        o.sub_connection = Some(subscribe);
    })
}

/// Override the instance identifier.
pub fn local_id(id: impl Into<String>) -> WatcherOption {
    let id = id.into();
    WatcherOption::new(move |o| o.local_id = id)
}

/// Drop notifications this watcher published itself.
pub fn ignore_self(ignore: bool) -> WatcherOption {
    WatcherOption::new(move |o| o.ignore_self = ignore)
}

/// Collapse bursts of notifications into one trailing callback.
pub fn squash_messages(squash: bool) -> WatcherOption {
    WatcherOption::new(move |o| o.squash_messages = squash)
}

/// Quiet period that ends a squashed burst.
pub fn squash_timeout_short(timeout: Duration) -> WatcherOption {
    WatcherOption::new(move |o| o.squash_timeout_short = timeout)
}

/// Idle wait used while nothing is pending.
pub fn squash_timeout_long(timeout: Duration) -> WatcherOption {
    WatcherOption::new(move |o| o.squash_timeout_long = timeout)
}

/// Delay between subscription attempts.
pub fn reconnect_interval(interval: Duration) -> WatcherOption {
    WatcherOption::new(move |o| o.reconnect_interval = interval)
}

/// Send a record per observed operation to `sink`.
pub fn metrics_sink(sink: impl MetricsSink + 'static) -> WatcherOption {
    let sink: Arc<dyn MetricsSink> = Arc::new(sink);
    WatcherOption::new(move |o| o.metrics_sink = Some(sink))
}

/// Send a record per observed operation to `callback`.
pub fn metrics_callback<F>(callback: F) -> WatcherOption
where
    F: Fn(&WatcherMetrics) + Send + Sync + 'static,
{
    metrics_sink(callback)
}

/// Report subscription failures and update callback panics to `callback`.
pub fn reconnect_failure_callback<F>(callback: F) -> WatcherOption
where
    F: Fn(&WatcherError) + Send + Sync + 'static,
{
    let callback: ReconnectFailureCallback = Arc::new(callback);
    WatcherOption::new(move |o| o.reconnect_failure = Some(callback))
}

/// Open owned connections through `dialer`.
pub fn with_dialer(dialer: impl Dialer + 'static) -> WatcherOption {
    let dialer: Arc<dyn Dialer> = Arc::new(dialer);
    WatcherOption::new(move |o| o.dialer = Some(dialer))
}
