//! In-process event bus for dispatcher updates.
//!
//! Provides a lightweight fan-out channel for UI subscriptions. Disconnected
//! subscribers are pruned on publish.

use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender, unbounded};

/// Dispatcher event payloads published to subscribers.
#[derive(Clone, Debug, PartialEq)]
pub enum DispatchEvent {
    QueueChanged,
    ItemStarted { id: String },
    ItemCompleted { id: String },
    ItemFailed { id: String, message: String },
    PlaybackError { message: String },
}

#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<DispatchEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> Receiver<DispatchEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    pub fn publish(&self, event: DispatchEvent) {
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Notify subscribers that the queue contents or order changed.
    pub fn queue_changed(&self) {
        self.publish(DispatchEvent::QueueChanged);
    }

    /// Notify subscribers that an item began synthesis/playback.
    pub fn item_started(&self, id: &str) {
        self.publish(DispatchEvent::ItemStarted { id: id.to_string() });
    }

    /// Notify subscribers that an item finished playing.
    pub fn item_completed(&self, id: &str) {
        self.publish(DispatchEvent::ItemCompleted { id: id.to_string() });
    }

    /// Notify subscribers that an item failed terminally.
    pub fn item_failed(&self, id: &str, message: impl Into<String>) {
        self.publish(DispatchEvent::ItemFailed {
            id: id.to_string(),
            message: message.into(),
        });
    }

    /// Surface an asynchronous playback error not tied to a specific item.
    pub fn playback_error(&self, message: impl Into<String>) {
        self.publish(DispatchEvent::PlaybackError {
            message: message.into(),
        });
    }
}
