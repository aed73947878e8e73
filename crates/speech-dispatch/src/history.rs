//! Utterance history log.
//!
//! Newest-first, capped record of everything the dispatcher has sent to
//! synthesis. An explicit constructor-owned object rather than ambient state
//! so it stays independently testable.

use chrono::{DateTime, Utc};

/// Terminal-or-in-flight state of a history entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryStatus {
    Processing,
    Completed,
    Error,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HistoryEntry {
    pub id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub status: HistoryStatus,
}

/// Capped, newest-first log of dispatched utterances.
#[derive(Debug)]
pub struct HistoryLog {
    entries: Vec<HistoryEntry>,
    max_entries: usize,
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::with_capacity(100)
    }
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_entries,
        }
    }

    /// Record an utterance as in flight.
    ///
    /// Re-recording an id (a requeued utterance) moves it to the front
    /// instead of duplicating it.
    pub fn record(&mut self, id: &str, text: &str) {
        self.entries.retain(|e| e.id != id);
        self.entries.insert(
            0,
            HistoryEntry {
                id: id.to_string(),
                text: text.to_string(),
                timestamp: Utc::now(),
                status: HistoryStatus::Processing,
            },
        );
        self.entries.truncate(self.max_entries);
    }

    /// Update an entry's status; absent ids are ignored.
    pub fn update_status(&mut self, id: &str, status: HistoryStatus) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) {
            entry.status = status;
        }
    }

    pub fn remove(&mut self, id: &str) {
        self.entries.retain(|e| e.id != id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries, newest first.
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_inserts_newest_first() {
        let mut log = HistoryLog::new();
        log.record("a", "first");
        log.record("b", "second");

        let texts: Vec<&str> = log.entries().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["second", "first"]);
        assert_eq!(log.entries()[0].status, HistoryStatus::Processing);
    }

    #[test]
    fn capacity_drops_the_oldest_entries() {
        let mut log = HistoryLog::with_capacity(2);
        log.record("a", "one");
        log.record("b", "two");
        log.record("c", "three");

        let ids: Vec<&str> = log.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn re_recording_an_id_moves_it_to_front() {
        let mut log = HistoryLog::new();
        log.record("a", "one");
        log.record("b", "two");
        log.record("a", "one");

        let ids: Vec<&str> = log.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(log.entries().len(), 2);
    }

    #[test]
    fn update_status_touches_only_the_matching_entry() {
        let mut log = HistoryLog::new();
        log.record("a", "one");
        log.record("b", "two");

        log.update_status("a", HistoryStatus::Completed);
        log.update_status("missing", HistoryStatus::Error);

        assert_eq!(log.entries()[1].status, HistoryStatus::Completed);
        assert_eq!(log.entries()[0].status, HistoryStatus::Processing);
    }

    #[test]
    fn remove_and_clear_work() {
        let mut log = HistoryLog::new();
        log.record("a", "one");
        log.record("b", "two");

        log.remove("a");
        assert_eq!(log.entries().len(), 1);

        log.clear();
        assert!(log.entries().is_empty());
    }
}
