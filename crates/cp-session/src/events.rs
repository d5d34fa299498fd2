use std::sync::{Arc, Mutex, MutexGuard};

/// A broadcast-style event bus built on top of flume channels.
///
/// Each call to [`EventBus::subscribe`] creates a new receiver that will
/// receive every event published after the subscription was created, in
/// publish order. Cloning the bus shares the subscriber list.
pub struct EventBus<T> {
    inner: Arc<Mutex<Vec<flume::Sender<T>>>>,
}

impl<T: Clone> EventBus<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a new subscriber and return its receiving end. Dropping the
    /// receiver unsubscribes it.
    pub fn subscribe(&self) -> flume::Receiver<T> {
        let (tx, rx) = flume::unbounded();
        self.senders().push(tx);
        rx
    }

    /// Publish an event to all current subscribers, pruning the ones whose
    /// receivers are gone.
    pub fn publish(&self, event: T) {
        self.senders().retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.senders().len()
    }

    fn senders(&self) -> MutexGuard<'_, Vec<flume::Sender<T>>> {
        self.inner.lock().unwrap_or_else(|e| {
            tracing::warn!("event bus lock was poisoned, recovering");
            e.into_inner()
        })
    }
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}
