//! In-process broker.
//!
//! [`MemoryBroker`] behaves like a minimal Redis pub/sub server living inside
//! the current process. It is a [`Dialer`], so it can be handed to a watcher
//! with [`with_dialer`](crate::core::options::with_dialer). Delivery is
//! at-most-once exactly like the real thing: a payload published while nobody
//! is subscribed is dropped.
//!
//! The broker can also be told to misbehave (refuse dials, drop every
//! connection, unsubscribe clients server-side), which is what the crate's own
//! tests use to exercise reconnects.

use super::{BrokerEvent, ConnectionRole, Connection, DialTarget, Dialer};
use crate::error::{Result, WatcherError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Shared broker state.
struct BrokerState {
    reachable: bool,
    password: Option<String>,
    next_id: u64,
    peers: HashMap<u64, Peer>,
}

/// Broker-side view of a client connection.
struct Peer {
    inbox: mpsc::UnboundedSender<BrokerEvent>,
    channels: HashSet<String>,
}

/// An in-process publish/subscribe broker.
///
/// Cloning is cheap; clones share the same broker.
///
/// # Examples
///
/// ```rust
/// use policy_watcher::broker::{BrokerEvent, ConnectionRole, DialTarget, Dialer, MemoryBroker};
///
/// # async fn example() -> policy_watcher::error::Result<()> {
/// let broker = MemoryBroker::new();
/// let target = DialTarget {
///     protocol: "tcp".into(),
///     address: "memory".into(),
///     credential: None,
/// };
///
/// let sub = broker.dial(ConnectionRole::Subscribe, &target).await?;
/// sub.subscribe("/casbin").await?;
///
/// let publisher = broker.dial(ConnectionRole::Publish, &target).await?;
/// assert_eq!(publisher.publish("/casbin", "hello").await?, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    /// Create an empty, reachable broker without a password.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                reachable: true,
                password: None,
                next_id: 0,
                peers: HashMap::new(),
            })),
        }
    }

    /// Require `AUTH` with the given password for new connections.
    ///
    /// Passing `None` disables authentication. Existing connections are not
    /// affected.
    pub fn set_password(&self, password: Option<String>) {
        self.state.lock().password = password;
    }

    /// Make the broker accept or refuse new connections.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Drop every open connection, as if the server restarted.
    ///
    /// Returns the number of connections dropped.
    pub fn disconnect_all(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.peers.len();
        state.peers.clear();
        dropped
    }

    /// Unsubscribe every client from `channel` on the server side.
    ///
    /// Each affected client receives a subscription confirmation carrying its
    /// remaining subscription count.
    pub fn unsubscribe_all(&self, channel: &str) -> usize {
        let mut state = self.state.lock();
        let mut affected = 0;
        for peer in state.peers.values_mut() {
            if peer.channels.remove(channel) {
                affected += 1;
                let _ = peer.inbox.send(BrokerEvent::Subscription {
                    channel: channel.to_string(),
                    count: peer.channels.len(),
                });
            }
        }
        affected
    }

    /// Number of connections currently subscribed to `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.state
            .lock()
            .peers
            .values()
            .filter(|peer| peer.channels.contains(channel))
            .count()
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.state.lock().peers.len()
    }

    fn register(&self) -> Result<MemoryConnection> {
        let mut state = self.state.lock();
        if !state.reachable {
            return Err(WatcherError::Dial("memory broker is unreachable".to_string()));
        }

        let id = state.next_id;
        state.next_id += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        state.peers.insert(
            id,
            Peer {
                inbox: tx,
                channels: HashSet::new(),
            },
        );

        Ok(MemoryConnection {
            id,
            state: Arc::clone(&self.state),
            inbox: tokio::sync::Mutex::new(rx),
            closed: AtomicBool::new(false),
        })
    }

    fn required_password(&self) -> Option<String> {
        self.state.lock().password.clone()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dialer for MemoryBroker {
    async fn dial(&self, role: ConnectionRole, target: &DialTarget) -> Result<Arc<dyn Connection>> {
        let conn = self.register()?;

        if let Some(required) = self.required_password() {
            let supplied = target.credential.as_ref().map(|c| c.password.as_str());
            if supplied != Some(required.as_str()) {
                conn.close().await?;
                return Err(WatcherError::Auth(format!(
                    "{} connection rejected: invalid password",
                    role.as_str()
                )));
            }
        }

        Ok(Arc::new(conn))
    }
}

/// A client connection to a [`MemoryBroker`].
pub struct MemoryConnection {
    id: u64,
    state: Arc<Mutex<BrokerState>>,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<BrokerEvent>>,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn with_peer<T>(&self, f: impl FnOnce(&mut Peer) -> T) -> Result<T> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WatcherError::ConnectionClosed);
        }
        let mut state = self.state.lock();
        let peer = state
            .peers
            .get_mut(&self.id)
            .ok_or(WatcherError::ConnectionClosed)?;
        Ok(f(peer))
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        if !self.is_alive() {
            return Err(WatcherError::ConnectionClosed);
        }

        let state = self.state.lock();
        let mut receivers = 0;
        for peer in state.peers.values() {
            if peer.channels.contains(channel) {
                let event = BrokerEvent::Message {
                    channel: channel.to_string(),
                    payload: payload.to_string(),
                };
                if peer.inbox.send(event).is_ok() {
                    receivers += 1;
                }
            }
        }
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        self.with_peer(|peer| {
            peer.channels.insert(channel.to_string());
            let _ = peer.inbox.send(BrokerEvent::Subscription {
                channel: channel.to_string(),
                count: peer.channels.len(),
            });
        })
    }

    async fn receive(&self) -> Result<BrokerEvent> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WatcherError::ConnectionClosed);
        }
        let mut inbox = self.inbox.lock().await;
        inbox.recv().await.ok_or(WatcherError::ConnectionClosed)
    }

    // No confirmation is queued here; a later subscribe on the same
    // connection must not observe a stale zero count.
    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.with_peer(|peer| {
            peer.channels.remove(channel);
        })
    }

    fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.state.lock().peers.contains_key(&self.id)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.state.lock().peers.remove(&self.id);
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.state.lock().peers.remove(&self.id);
    }
}
