//! Priority-ordered utterance queue.
//!
//! Owns queue mutations; the dispatcher decides when to pull the next item.
//! Iteration order is always priority-descending with creation-time-ascending
//! tie-break, re-established by `add` and `load_json` only.

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use speech_types::{ItemStatus, Priority, QUEUE_FILE_VERSION, QueueFile, QueueItem};

#[derive(Debug, Error)]
pub enum QueueError {
    /// The utterance text is empty after trimming.
    #[error("text must not be empty")]
    EmptyText,
    /// The persisted queue could not be parsed.
    #[error("invalid queue format: {0}")]
    Format(#[from] serde_json::Error),
}

/// The dispatcher's ordered work list of pending utterances.
///
/// Items are plain values exclusively owned by this queue. Construct one per
/// dispatcher; there is no ambient global instance.
#[derive(Debug, Default)]
pub struct SpeechQueue {
    items: Vec<QueueItem>,
}

impl SpeechQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a trimmed utterance and re-sort the queue.
    pub fn add(&mut self, text: &str, priority: Priority) -> Result<QueueItem, QueueError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(QueueError::EmptyText);
        }

        let item = QueueItem {
            id: format!("queue-{}", Uuid::new_v4()),
            text: text.to_string(),
            priority,
            status: ItemStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.items.push(item.clone());
        self.sort();
        Ok(item)
    }

    /// First item in iteration order whose status is `pending`.
    ///
    /// Does not mutate status; callers mark the item `processing` themselves,
    /// which is what prevents a second concurrent dequeue.
    pub fn get_next(&self) -> Option<&QueueItem> {
        self.items.iter().find(|i| i.status == ItemStatus::Pending)
    }

    pub fn get(&self, id: &str) -> Option<&QueueItem> {
        self.items.iter().find(|i| i.id == id)
    }

    /// All items in externally-visible order.
    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Set an item's status; `completed` also stamps `completed_at`.
    ///
    /// An absent id is a no-op.
    pub fn update_status(&mut self, id: &str, status: ItemStatus) {
        if let Some(item) = self.items.iter_mut().find(|i| i.id == id) {
            item.status = status;
            if status == ItemStatus::Completed {
                item.completed_at = Some(Utc::now());
            }
        }
    }

    /// Remove one item; removing a nonexistent id is not an error.
    pub fn remove(&mut self, id: &str) {
        self.items.retain(|i| i.id != id);
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Manual reorder override.
    ///
    /// Deliberately does not re-trigger the priority sort (only `add` and
    /// `load_json` sort), so a manual move survives until the next add. This
    /// means manual order and priority order can visibly conflict; callers
    /// must not rely on priority order right after a move.
    pub fn move_item(&mut self, id: &str, new_index: usize) {
        let Some(pos) = self.items.iter().position(|i| i.id == id) else {
            return;
        };
        let item = self.items.remove(pos);
        let idx = new_index.min(self.items.len());
        self.items.insert(idx, item);
    }

    /// Serialize the queue for reload-safe persistence.
    pub fn to_json(&self) -> Result<String, QueueError> {
        let file = QueueFile {
            version: QUEUE_FILE_VERSION.to_string(),
            items: self.items.clone(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    /// Restore a previously saved queue.
    ///
    /// Destructive-then-populate: the queue is cleared before parsing, so a
    /// parse failure leaves it empty. That degraded state is accepted behavior
    /// rather than masked.
    pub fn load_json(&mut self, json: &str) -> Result<(), QueueError> {
        self.items.clear();
        let file: QueueFile = serde_json::from_str(json)?;
        self.items = file.items;
        self.sort();
        Ok(())
    }

    /// Priority descending, creation time ascending. The sort is stable, so
    /// items with identical timestamps keep insertion order.
    fn sort(&mut self) {
        self.items.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
    }
}
