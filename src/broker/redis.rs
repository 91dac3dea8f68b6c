//! Redis transport.
//!
//! The publish side uses a multiplexed async connection, which is safe to share
//! between concurrent `update()` callers. The subscribe side uses a dedicated
//! [`redis::aio::PubSub`] connection.

use super::{BrokerEvent, Connection, ConnectionRole, Credential, DialTarget, Dialer};
use crate::error::{Result, WatcherError};
use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{MultiplexedConnection, PubSub};
use redis::{Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
#[cfg(unix)]
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Dials Redis servers.
///
/// Supported protocols are `tcp` (`host:port` addresses) and `unix` (socket
/// paths). Anything else fails at dial time.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisDialer;

impl RedisDialer {
    /// Create a new dialer.
    pub fn new() -> Self {
        Self
    }
}

/// Build the connection info for a dial target.
fn connection_info(target: &DialTarget) -> Result<ConnectionInfo> {
    let addr = match target.protocol.as_str() {
        "tcp" => {
            let (host, port) = target.address.rsplit_once(':').ok_or_else(|| {
                WatcherError::Dial(format!("invalid address '{}': expected host:port", target.address))
            })?;
            // IPv6 literals arrive bracketed, e.g. `[::1]:6379`
            let host = host
                .strip_prefix('[')
                .and_then(|h| h.strip_suffix(']'))
                .unwrap_or(host);
            if host.is_empty() {
                return Err(WatcherError::Dial(format!(
                    "invalid address '{}': missing host",
                    target.address
                )));
            }
            let port = port.parse::<u16>().map_err(|e| {
                WatcherError::Dial(format!("invalid port in '{}': {}", target.address, e))
            })?;
            ConnectionAddr::Tcp(host.to_string(), port)
        }
        #[cfg(unix)]
        "unix" => ConnectionAddr::Unix(PathBuf::from(&target.address)),
        other => return Err(WatcherError::UnsupportedProtocol(other.to_string())),
    };

    let (username, password) = match &target.credential {
        Some(Credential { username, password }) => (username.clone(), Some(password.clone())),
        None => (None, None),
    };

    Ok(ConnectionInfo {
        addr,
        redis: RedisConnectionInfo {
            username,
            password,
            ..Default::default()
        },
    })
}

/// Map a handshake error to a dial or authentication failure.
fn dial_error(err: redis::RedisError) -> WatcherError {
    if err.kind() == redis::ErrorKind::AuthenticationFailed {
        WatcherError::Auth(err.to_string())
    } else {
        WatcherError::Dial(err.to_string())
    }
}

#[async_trait]
impl Dialer for RedisDialer {
    async fn dial(&self, role: ConnectionRole, target: &DialTarget) -> Result<Arc<dyn Connection>> {
        let info = connection_info(target)?;
        let client = Client::open(info).map_err(dial_error)?;

        // AUTH runs as part of the connection handshake; a rejected credential
        // drops the socket before anything is returned.
        let conn: Arc<dyn Connection> = match role {
            ConnectionRole::Publish => {
                let conn = client
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(dial_error)?;
                Arc::new(RedisPublisher {
                    conn: parking_lot::Mutex::new(Some(conn)),
                    alive: AtomicBool::new(true),
                })
            }
            ConnectionRole::Subscribe => {
                let pubsub = client.get_async_pubsub().await.map_err(dial_error)?;
                Arc::new(RedisSubscriber {
                    pubsub: tokio::sync::Mutex::new(Some(pubsub)),
                    alive: AtomicBool::new(true),
                })
            }
        };

        debug!(role = role.as_str(), address = %target.address, "dialed redis");
        Ok(conn)
    }
}

/// Publish-side Redis connection.
struct RedisPublisher {
    conn: parking_lot::Mutex<Option<MultiplexedConnection>>,
    alive: AtomicBool,
}

impl RedisPublisher {
    fn connection(&self) -> Result<MultiplexedConnection> {
        self.conn.lock().clone().ok_or(WatcherError::ConnectionClosed)
    }

    fn observe(&self, err: redis::RedisError) -> WatcherError {
        if err.is_io_error() || err.is_connection_dropped() {
            self.alive.store(false, Ordering::Release);
        }
        WatcherError::Publish(err.to_string())
    }
}

#[async_trait]
impl Connection for RedisPublisher {
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        let mut conn = self.connection()?;
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.observe(e))?;
        Ok(receivers.max(0) as usize)
    }

    async fn subscribe(&self, _channel: &str) -> Result<()> {
        Err(WatcherError::Subscribe(
            "publish connection cannot subscribe".to_string(),
        ))
    }

    async fn receive(&self) -> Result<BrokerEvent> {
        Err(WatcherError::Receive(
            "publish connection cannot receive".to_string(),
        ))
    }

    async fn unsubscribe(&self, _channel: &str) -> Result<()> {
        Err(WatcherError::Subscribe(
            "publish connection cannot unsubscribe".to_string(),
        ))
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && self.conn.lock().is_some()
    }

    async fn close(&self) -> Result<()> {
        self.alive.store(false, Ordering::Release);
        self.conn.lock().take();
        Ok(())
    }
}

/// Subscribe-side Redis connection.
struct RedisSubscriber {
    pubsub: tokio::sync::Mutex<Option<PubSub>>,
    alive: AtomicBool,
}

impl RedisSubscriber {
    fn observe(&self, err: redis::RedisError) -> WatcherError {
        if err.is_io_error() || err.is_connection_dropped() {
            self.alive.store(false, Ordering::Release);
        }
        WatcherError::Subscribe(err.to_string())
    }
}

#[async_trait]
impl Connection for RedisSubscriber {
    async fn publish(&self, _channel: &str, _payload: &str) -> Result<usize> {
        Err(WatcherError::Publish(
            "subscribe connection cannot publish".to_string(),
        ))
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        let mut guard = self.pubsub.lock().await;
        let pubsub = guard.as_mut().ok_or(WatcherError::ConnectionClosed)?;
        pubsub.subscribe(channel).await.map_err(|e| self.observe(e))
    }

    // redis-rs consumes subscription confirmations internally, so only
    // messages surface here. The stream ending means the socket is gone.
    async fn receive(&self) -> Result<BrokerEvent> {
        let mut guard = self.pubsub.lock().await;
        let pubsub = guard.as_mut().ok_or(WatcherError::ConnectionClosed)?;
        let mut messages = std::pin::pin!(pubsub.on_message());
        match messages.next().await {
            Some(msg) => Ok(BrokerEvent::Message {
                channel: msg.get_channel_name().to_string(),
                payload: String::from_utf8_lossy(msg.get_payload_bytes()).into_owned(),
            }),
            None => {
                self.alive.store(false, Ordering::Release);
                Err(WatcherError::ConnectionClosed)
            }
        }
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        let mut guard = self.pubsub.lock().await;
        let pubsub = guard.as_mut().ok_or(WatcherError::ConnectionClosed)?;
        pubsub.unsubscribe(channel).await.map_err(|e| self.observe(e))
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<()> {
        self.alive.store(false, Ordering::Release);
        self.pubsub.lock().await.take();
        Ok(())
    }
}
