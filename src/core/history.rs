//! Ordered record of visited stages.
//!
//! Every committed transition appends one entry, so the history is an exact
//! replay of the path the flow took, including repeated visits to the same
//! stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// One visited stage, with the moment it was entered and the data that was
/// committed alongside it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Name of the stage entered.
    pub stage: String,
    /// When the stage was entered.
    pub timestamp: DateTime<Utc>,
    /// Data committed with the entry, if any.
    pub data: Option<Value>,
}

/// Append-only sequence of visited stages.
///
/// Empty until the first transition commits; each committed transition
/// appends its target. The initial stage is not recorded by itself.
///
/// # Example
///
/// ```rust
/// use flowstage::core::FlowHistory;
///
/// let mut history = FlowHistory::new();
/// history.record("intro".to_string(), None);
/// history.record("menu".to_string(), None);
///
/// assert_eq!(history.stage_path(), vec!["intro", "menu"]);
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FlowHistory {
    entries: Vec<HistoryEntry>,
}

impl FlowHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Rebuild a history from previously recorded entries.
    pub(crate) fn from_entries(entries: Vec<HistoryEntry>) -> Self {
        Self { entries }
    }

    /// Append a visited stage, timestamped now.
    pub fn record(&mut self, stage: String, data: Option<Value>) {
        self.entries.push(HistoryEntry {
            stage,
            timestamp: Utc::now(),
            data,
        });
    }

    /// All entries in visit order.
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Names of visited stages, in order, repeats included.
    pub fn stage_path(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.stage.as_str()).collect()
    }

    /// Last visited stage, if any.
    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    /// Elapsed time between the first and last entry.
    ///
    /// `None` when the history is empty; zero with a single entry.
    pub fn duration(&self) -> Option<Duration> {
        if let (Some(first), Some(last)) = (self.entries.first(), self.entries.last()) {
            last.timestamp
                .signed_duration_since(first.timestamp)
                .to_std()
                .ok()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
