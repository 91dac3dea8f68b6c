//! The watcher: publishes policy change notifications and delivers the ones
//! published by peers.

use crate::broker::{DialTarget, Dialer};
use crate::core::WatcherBuilder;
use crate::core::connection::ConnectionManager;
use crate::core::options::{WatcherOption, WatcherOptions};
use crate::error::{Result, WatcherError};
use crate::metrics::{MetricOp, MetricsRecorder, WatcherMetrics};
use crate::notify::UpdateCallback;
use crate::notify::processor::{CallbackSlot, Processor, ProcessorSettings};
use crate::notify::subscription::Supervisor;
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OnceCell, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[cfg(feature = "redis")]
use crate::broker::RedisDialer;

/// Whether the watcher also listens for peer notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    PublishSubscribe,
    PublishOnly,
}

/// A policy change notification channel.
///
/// `update()` tells every peer on the channel that the policy changed; peers'
/// update callbacks fire with this watcher's instance identifier as payload.
/// Unless opened publish-only, the watcher keeps a subscription to the same
/// channel in the background, reconnecting after failures, and invokes its own
/// update callback for notifications from peers.
///
/// Call [`close`](Watcher::close) when done. Dropping an unclosed watcher stops
/// its background tasks, and the owned connections are released once those
/// tasks exit, but nothing is awaited.
///
/// # Examples
///
/// ```rust,no_run
/// use policy_watcher::prelude::*;
/// use policy_watcher::options;
///
/// # async fn example() -> Result<()> {
/// let watcher = Watcher::open(
///     "127.0.0.1:6379",
///     [options::password("secret"), options::ignore_self(true)],
/// )
/// .await?;
///
/// watcher.set_update_callback(|msg| {
///     println!("policy changed by {msg}, reloading");
/// });
///
/// // After saving the policy locally:
/// watcher.update().await?;
///
/// watcher.close().await;
/// # Ok(())
/// # }
/// ```
pub struct Watcher {
    options: WatcherOptions,
    connections: Arc<ConnectionManager>,
    metrics: Arc<MetricsRecorder>,
    callback: CallbackSlot,
    shutdown: CancellationToken,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    teardown: OnceCell<()>,
}

impl Watcher {
    /// Connect to the broker at `address` and start listening for changes.
    ///
    /// Defaults are applied first, then `options` in order.
    ///
    /// # Errors
    ///
    /// Returns an error if either connection cannot be dialed or
    /// authenticated.
    pub async fn open(
        address: impl Into<String>,
        options: impl IntoIterator<Item = WatcherOption>,
    ) -> Result<Self> {
        Self::start(address.into(), options, Mode::PublishSubscribe).await
    }

    /// Connect to the broker at `address` for publishing only.
    ///
    /// The returned watcher never subscribes, so its update callback never
    /// fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the publish connection cannot be dialed or
    /// authenticated.
    pub async fn open_publish_only(
        address: impl Into<String>,
        options: impl IntoIterator<Item = WatcherOption>,
    ) -> Result<Self> {
        Self::start(address.into(), options, Mode::PublishOnly).await
    }

    /// Create a builder for a watcher connecting to `address`.
    pub fn builder(address: impl Into<String>) -> WatcherBuilder {
        WatcherBuilder::new(address)
    }

    async fn start(
        address: String,
        options: impl IntoIterator<Item = WatcherOption>,
        mode: Mode,
    ) -> Result<Self> {
        let options = WatcherOptions::default().apply(options);

        let metrics = Arc::new(MetricsRecorder::new(
            options.metrics_sink.clone(),
            &options.channel,
            &options.local_id,
            &options.protocol,
        ));

        let target = DialTarget {
            protocol: options.protocol.clone(),
            address,
            credential: options.credential(),
        };

        let connections = Arc::new(ConnectionManager::new(
            target,
            options.dialer.clone().or_else(default_dialer),
            options.pub_connection.clone(),
            options.sub_connection.clone(),
            Arc::clone(&metrics),
        ));

        let connected = match mode {
            Mode::PublishSubscribe => connections.connect().await,
            Mode::PublishOnly => connections.publisher().await.map(|_| ()),
        };
        if let Err(err) = connected {
            // Don't leak a publish connection when only the subscribe side failed
            connections.close().await;
            return Err(err);
        }

        let watcher = Self {
            options,
            connections,
            metrics,
            callback: Arc::new(ArcSwapOption::empty()),
            shutdown: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Vec::new()),
            teardown: OnceCell::new(),
        };

        if mode == Mode::PublishSubscribe {
            watcher.spawn_background();
        }

        info!(
            channel = %watcher.options.channel,
            local_id = %watcher.options.local_id,
            publish_only = mode == Mode::PublishOnly,
            "watcher opened"
        );

        Ok(watcher)
    }

    fn spawn_background(&self) {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        let processor = Processor::new(
            ProcessorSettings {
                local_id: self.options.local_id.clone(),
                ignore_self: self.options.ignore_self,
                squash: self.options.squash_messages,
                timeout_short: self.options.squash_timeout_short,
                timeout_long: self.options.squash_timeout_long,
            },
            Arc::clone(&self.callback),
            self.options.reconnect_failure.clone(),
        );

        let supervisor = Supervisor {
            connections: Arc::clone(&self.connections),
            metrics: Arc::clone(&self.metrics),
            channel: self.options.channel.clone(),
            interval: self.options.reconnect_interval,
            on_failure: self.options.reconnect_failure.clone(),
        };

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(processor.run(queue_rx, self.shutdown.clone())));
        tasks.push(tokio::spawn(supervisor.run(queue_tx, self.shutdown.clone())));
    }

    /// Install the callback invoked for each delivered notification.
    ///
    /// Replaces any previous callback. Takes effect for subsequent deliveries;
    /// notifications that arrived while no callback was installed are not
    /// replayed.
    pub fn set_update_callback<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.install_callback(Box::new(callback));
    }

    pub(crate) fn install_callback(&self, callback: UpdateCallback) {
        self.callback.store(Some(Arc::new(callback)));
    }

    /// Install or replace the metrics callback.
    pub fn set_metrics_callback<F>(&self, callback: F)
    where
        F: Fn(&WatcherMetrics) + Send + Sync + 'static,
    {
        self.metrics.set_sink(Some(Arc::new(callback)));
    }

    /// Publish this watcher's instance identifier on the channel.
    ///
    /// A dead owned publish connection is redialed first. Publish failures are
    /// returned as-is and not retried.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::Closed`] after [`close`](Watcher::close), and
    /// the dial or publish error otherwise.
    pub async fn update(&self) -> Result<()> {
        if self.is_closed() {
            return Err(WatcherError::Closed);
        }

        let channel = &self.options.channel;
        let payload = &self.options.local_id;

        let started = Instant::now();
        let result = match self.connections.publisher().await {
            Ok(conn) => conn.publish(channel, payload).await,
            Err(err) => Err(err),
        };
        self.metrics
            .record_result(MetricOp::Publish, started.elapsed(), &result, Some(payload.len()));

        match result {
            Ok(receivers) => {
                debug!(channel = %channel, receivers, "published policy update");
                Ok(())
            }
            Err(err) => {
                if err.is_disconnect() {
                    debug!(channel = %channel, "publish connection lost, redialing on next update");
                }
                Err(err)
            }
        }
    }

    /// Stop background tasks and close the owned connections.
    ///
    /// Safe to call any number of times, concurrently; exactly one call does
    /// the teardown and every call returns once it has finished.
    pub async fn close(&self) {
        self.teardown
            .get_or_init(|| async {
                self.shutdown.cancel();

                let tasks = std::mem::take(&mut *self.tasks.lock());
                for task in tasks {
                    if let Err(err) = task.await {
                        debug!(error = %err, "background task ended abnormally");
                    }
                }

                self.connections.close().await;
                info!(channel = %self.options.channel, "watcher closed");
            })
            .await;
    }

    /// Whether [`close`](Watcher::close) has been called or started.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// The effective options.
    pub fn options(&self) -> &WatcherOptions {
        &self.options
    }

    /// This watcher's instance identifier.
    pub fn local_id(&self) -> &str {
        &self.options.local_id
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn default_dialer() -> Option<Arc<dyn Dialer>> {
    #[cfg(feature = "redis")]
    {
        Some(Arc::new(RedisDialer::new()))
    }

    #[cfg(not(feature = "redis"))]
    {
        None
    }
}
