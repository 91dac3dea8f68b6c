//! The host-facing watcher capability.

use crate::core::Watcher;
use crate::error::Result;
use crate::notify::UpdateCallback;
use async_trait::async_trait;

/// What a policy enforcer needs from a change notification channel.
///
/// The enforcer calls [`update`](PolicyWatcher::update) whenever its policy
/// store changes, and installs one callback to hear about changes made by
/// peers.
#[async_trait]
pub trait PolicyWatcher: Send + Sync {
    /// Install the callback invoked when a peer reports a policy change.
    fn set_update_callback(&self, callback: UpdateCallback);

    /// Tell every peer that the policy changed.
    async fn update(&self) -> Result<()>;
}

#[async_trait]
impl PolicyWatcher for Watcher {
    fn set_update_callback(&self, callback: UpdateCallback) {
        self.install_callback(callback);
    }

    async fn update(&self) -> Result<()> {
        Watcher::update(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::core::options;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_watcher_as_trait_object() {
        let broker = MemoryBroker::new();
        let listener = Watcher::open("memory", [options::with_dialer(broker.clone())])
            .await
            .unwrap();
        let publisher: Arc<dyn PolicyWatcher> = Arc::new(
            Watcher::open_publish_only("memory", [options::with_dialer(broker.clone())])
                .await
                .unwrap(),
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener: Arc<dyn PolicyWatcher> = Arc::new(listener);
        listener.set_update_callback(Box::new(move |msg: &str| {
            let _ = tx.send(msg.to_string());
        }));

        for _ in 0..200 {
            if broker.subscriber_count("/casbin") == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        publisher.update().await.unwrap();
        let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(uuid::Uuid::parse_str(&msg).is_ok());
    }
}
