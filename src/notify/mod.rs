//! Change notification delivery.
//!
//! The subscription loop reads the broker and queues payloads; the processor
//! drains that queue on its own schedule and invokes the update callback.

pub(crate) mod processor;
pub(crate) mod subscription;

pub use processor::UpdateCallback;
