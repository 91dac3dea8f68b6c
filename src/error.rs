//! Error types for policy-watcher.

/// Result type alias for policy-watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Errors that can occur while talking to the broker.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WatcherError {
    /// Failed to establish a connection to the broker.
    #[error("Failed to dial broker: {0}")]
    Dial(String),

    /// The broker rejected the configured credential.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The configured protocol cannot be dialed.
    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    /// Publishing a change notification failed.
    #[error("Failed to publish: {0}")]
    Publish(String),

    /// Subscribing or unsubscribing failed.
    #[error("Subscription error: {0}")]
    Subscribe(String),

    /// Receiving from the subscribe connection failed.
    #[error("Failed to receive: {0}")]
    Receive(String),

    /// The connection was closed locally or by the broker.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No connection is available for the requested side and none can be
    /// dialed.
    #[error("Not connected: {0}")]
    NotConnected(&'static str),

    /// The watcher has been closed.
    #[error("Watcher is closed")]
    Closed,

    #[cfg(feature = "redis")]
    /// Error reported by the Redis client.
    #[error("Redis error: {0}")]
    Redis(String),

    /// The update callback panicked while handling a notification.
    #[error("Update callback panicked: {0}")]
    CallbackPanicked(String),
}

impl WatcherError {
    /// Whether the error means the underlying connection is no longer usable.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::ConnectionClosed | Self::Receive(_))
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for WatcherError {
    fn from(err: redis::RedisError) -> Self {
        if err.kind() == redis::ErrorKind::AuthenticationFailed {
            Self::Auth(err.to_string())
        } else if err.is_connection_dropped() {
            Self::ConnectionClosed
        } else {
            Self::Redis(err.to_string())
        }
    }
}
