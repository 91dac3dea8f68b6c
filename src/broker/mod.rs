//! Publish/subscribe broker transports.
//!
//! The watcher only ever talks to the broker through the [`Connection`] and
//! [`Dialer`] traits. Two implementations ship with the crate:
//! - [`redis`] (feature `redis`, enabled by default) for a real Redis server
//! - [`memory`] an in-process broker for tests and single-process hosts

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

pub use memory::{MemoryBroker, MemoryConnection};

#[cfg(feature = "redis")]
pub use self::redis::RedisDialer;

/// Which side of the watcher a connection serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionRole {
    /// Used only for `PUBLISH`.
    Publish,
    /// Used only for `SUBSCRIBE` / receive / `UNSUBSCRIBE`.
    Subscribe,
}

impl ConnectionRole {
    /// Short name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::Subscribe => "subscribe",
        }
    }
}

/// An event read from a subscribe connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// A payload published on a subscribed channel.
    Message {
        /// Channel the payload was published on.
        channel: String,
        /// The payload itself.
        payload: String,
    },
    /// A subscribe/unsubscribe confirmation.
    ///
    /// `count` is the number of channels the connection remains subscribed to.
    Subscription {
        /// Channel the confirmation refers to.
        channel: String,
        /// Remaining subscription count.
        count: usize,
    },
}

/// Credential presented to the broker with `AUTH`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Optional ACL user name.
    pub username: Option<String>,
    /// Password.
    pub password: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything a [`Dialer`] needs to open a fresh connection.
#[derive(Debug, Clone)]
pub struct DialTarget {
    /// Transport protocol, e.g. `tcp` or `unix`.
    pub protocol: String,
    /// Broker address, `host:port` for TCP.
    pub address: String,
    /// Credential to authenticate with, if any.
    pub credential: Option<Credential>,
}

/// A single broker connection.
///
/// Implementations must tolerate concurrent `publish` calls; all other methods
/// are only ever called from one task at a time.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Publish `payload` on `channel`, returning the number of receivers.
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize>;

    /// Subscribe to `channel`.
    async fn subscribe(&self, channel: &str) -> Result<()>;

    /// Wait for the next event on a subscribed connection.
    ///
    /// Blocks until a message arrives, the connection fails, or the broker
    /// closes it. There is no timeout.
    async fn receive(&self) -> Result<BrokerEvent>;

    /// Unsubscribe from `channel`.
    async fn unsubscribe(&self, channel: &str) -> Result<()>;

    /// Whether the connection is still usable.
    fn is_alive(&self) -> bool;

    /// Close the connection. Closing twice is not an error.
    async fn close(&self) -> Result<()>;
}

/// Opens and authenticates fresh broker connections.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Dial `target` for the given role.
    ///
    /// When `target.credential` is set the connection must be authenticated
    /// before it is returned; on authentication failure the freshly dialed
    /// connection is closed and [`WatcherError::Auth`](crate::error::WatcherError::Auth)
    /// is returned.
    async fn dial(&self, role: ConnectionRole, target: &DialTarget) -> Result<Arc<dyn Connection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_redacts_password() {
        let credential = Credential {
            username: Some("casbin".into()),
            password: "hunter2".into(),
        };
        let debug = format!("{:?}", credential);
        assert!(debug.contains("casbin"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_role_names() {
        assert_eq!(ConnectionRole::Publish.as_str(), "publish");
        assert_eq!(ConnectionRole::Subscribe.as_str(), "subscribe");
    }
}
