//! Change and rename events.
//!
//! Events ride a tokio broadcast channel and receivers are always
//! asynchronous tasks. That is what keeps the ordering guarantee cheap: a
//! mutating caller's continuation resumes before any subscriber task is
//! polled, so the caller observes its own result first, and events
//! published inside a change window land on the channel before any queued
//! external notification is applied.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use vigil_core::VfsResult;

/// Default capacity of the event channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// A change observed on the backend or produced by a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FsEvent {
    /// Stats or contents changed at a path.
    Changed {
        /// Changed path; `None` means anything may have changed.
        path: Option<String>,
        /// Child paths that appeared in the changed directory.
        added: Vec<String>,
        /// Child paths that disappeared from the changed directory.
        removed: Vec<String>,
    },
    /// An entry moved to a new path.
    Renamed {
        /// Previous canonical path.
        old_path: String,
        /// New canonical path.
        new_path: String,
    },
}

impl FsEvent {
    /// Short name used in log fields.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Changed { .. } => "change",
            Self::Renamed { .. } => "rename",
        }
    }
}

/// Broadcast bus for [`FsEvent`]s.
///
/// Publishing never blocks. Slow receivers that fall more than the channel
/// capacity behind lose the oldest events and are told how many they
/// missed.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<FsEvent>>,
    capacity: usize,
}

impl EventBus {
    /// Creates a bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a bus with a custom channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    /// Publishes an event to all subscribers, returning how many received
    /// it.
    pub fn publish(&self, event: FsEvent) -> usize {
        trace!(event_type = event.event_type(), "Publishing event");

        match self.sender.send(Arc::new(event)) {
            Ok(count) => {
                debug!(receivers = count, "Event published");
                count
            }
            Err(_) => {
                trace!("No receivers for event");
                0
            }
        }
    }

    /// Subscribes to all events from this point on.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Configured channel capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            capacity: self.capacity,
        }
    }
}

/// Receiving half of an event subscription.
#[derive(Debug)]
pub struct EventReceiver {
    receiver: broadcast::Receiver<Arc<FsEvent>>,
}

impl EventReceiver {
    /// Receives the next event, skipping over any gap caused by lag.
    ///
    /// Returns `None` once the bus is dropped and the backlog is drained.
    pub async fn recv(&mut self) -> Option<Arc<FsEvent>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(skipped = count, "Event receiver lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Receives an event if one is immediately available.
    pub fn try_recv(&mut self) -> Option<Arc<FsEvent>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    warn!(skipped = count, "Event receiver lagged, events dropped");
                }
                Err(_) => return None,
            }
        }
    }
}

/// Runs a fallible file system future on its own task, logging any failure
/// instead of reporting it.
///
/// For fire-and-forget mutations where no caller waits on the result. Must
/// be called from within a tokio runtime.
pub fn detach<F>(operation: &'static str, fut: F)
where
    F: Future<Output = VfsResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = fut.await {
            warn!(operation, error = %err, "Detached file system operation failed");
        }
    });
}
