//! Debounced delivery of received notifications to the update callback.
//!
//! The processor runs as its own task, so a slow callback never stalls the
//! broker receive loop and a pending squashed delivery can fire without any
//! new input.

use crate::core::options::ReconnectFailureCallback;
use crate::error::WatcherError;
use arc_swap::ArcSwapOption;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Callback invoked with the payload of each delivered notification.
pub type UpdateCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Shared, swappable slot holding the current update callback.
pub(crate) type CallbackSlot = Arc<ArcSwapOption<UpdateCallback>>;

/// What to do with one dequeued payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// Invoke the callback now.
    Immediate,
    /// Drop it.
    Suppress,
    /// Mark a squashed delivery pending and wait for the burst to end.
    Defer,
}

/// Decide how to handle a payload.
///
/// | ignore_self | squash | from self | action    |
/// |-------------|--------|-----------|-----------|
/// | false       | false  | any       | Immediate |
/// | true        | false  | true      | Suppress  |
/// | true        | false  | false     | Immediate |
/// | false       | true   | any       | Defer     |
/// | true        | true   | true      | Suppress  |
/// | true        | true   | false     | Defer     |
pub(crate) fn decide(ignore_self: bool, squash: bool, from_self: bool) -> Delivery {
    if ignore_self && from_self {
        Delivery::Suppress
    } else if squash {
        Delivery::Defer
    } else {
        Delivery::Immediate
    }
}

/// Settings the processor needs from the watcher options.
#[derive(Debug, Clone)]
pub(crate) struct ProcessorSettings {
    pub(crate) local_id: String,
    pub(crate) ignore_self: bool,
    pub(crate) squash: bool,
    pub(crate) timeout_short: Duration,
    pub(crate) timeout_long: Duration,
}

/// The single-slot pending squashed delivery.
#[derive(Debug, Default)]
struct Pending {
    payload: Option<String>,
}

impl Pending {
    fn is_set(&self) -> bool {
        self.payload.is_some()
    }
}

/// Consumes the message queue and invokes the update callback.
pub(crate) struct Processor {
    settings: ProcessorSettings,
    callback: CallbackSlot,
    on_failure: Option<ReconnectFailureCallback>,
    pending: Pending,
}

impl Processor {
    pub(crate) fn new(
        settings: ProcessorSettings,
        callback: CallbackSlot,
        on_failure: Option<ReconnectFailureCallback>,
    ) -> Self {
        Self {
            settings,
            callback,
            on_failure,
            pending: Pending::default(),
        }
    }

    /// Run until shutdown or until the queue's sender side is gone.
    pub(crate) async fn run(
        mut self,
        mut queue: mpsc::UnboundedReceiver<String>,
        shutdown: CancellationToken,
    ) {
        loop {
            let timeout = if self.pending.is_set() {
                self.settings.timeout_short
            } else {
                self.settings.timeout_long
            };

            // Biased: shutdown wins, then a queued message, then the timer.
            // A message that lands exactly at the deadline is processed as a
            // message and the timer restarts.
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                msg = queue.recv() => match msg {
                    Some(payload) => self.handle(payload),
                    None => break,
                },
                _ = tokio::time::sleep(timeout) => self.flush(),
            }
        }

        self.pending = Pending::default();
        trace!("delivery processor stopped");
    }

    fn handle(&mut self, payload: String) {
        let from_self = payload == self.settings.local_id;
        match decide(self.settings.ignore_self, self.settings.squash, from_self) {
            Delivery::Immediate => self.deliver(&payload),
            Delivery::Suppress => trace!("ignoring self-originated notification"),
            Delivery::Defer => self.pending.payload = Some(payload),
        }
    }

    fn flush(&mut self) {
        if let Some(payload) = self.pending.payload.take() {
            self.deliver(&payload);
        }
    }

    // A panicking callback must not take the processor down with it.
    fn deliver(&self, payload: &str) {
        let Some(callback) = self.callback.load_full() else {
            return;
        };

        if let Err(panic_err) = panic::catch_unwind(AssertUnwindSafe(|| callback(payload))) {
            let info = if let Some(msg) = panic_err.downcast_ref::<&'static str>() {
                (*msg).to_string()
            } else if let Some(msg) = panic_err.downcast_ref::<String>() {
                msg.clone()
            } else {
                "unknown panic".to_string()
            };

            let err = WatcherError::CallbackPanicked(info);
            warn!(error = %err, "update callback panicked");
            if let Some(on_failure) = &self.on_failure {
                on_failure(&err);
            }
        }
    }
}
