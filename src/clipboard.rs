//! Clipboard history fed by the agent's clipboard events.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

/// Maximum number of retained entries.
pub const MAX_HISTORY: usize = 1000;

/// One remembered clipboard value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClipboardItem {
    pub id: Uuid,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Most-recent-first clipboard history with a cycling cursor.
#[derive(Debug, Default)]
pub struct ClipboardHistory {
    items: Vec<ClipboardItem>,
    cursor: Option<usize>,
    current: String,
}

impl ClipboardHistory {
    /// Empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `text` seen at `timestamp_ms` (Unix milliseconds).
    ///
    /// Blank text and text equal to the current value are ignored. An older
    /// identical entry is removed before the new one is pushed to the front.
    /// Returns whether the history changed.
    pub fn add(&mut self, text: &str, timestamp_ms: u64) -> bool {
        if text.trim().is_empty() || text == self.current {
            return false;
        }

        let timestamp = i64::try_from(timestamp_ms)
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now);

        self.items.retain(|item| item.text != text);
        self.items.insert(
            0,
            ClipboardItem {
                id: Uuid::new_v4(),
                text: text.to_owned(),
                timestamp,
            },
        );
        self.items.truncate(MAX_HISTORY);
        self.current = text.to_owned();
        self.cursor = Some(0);
        debug!(entries = self.items.len(), "clipboard history updated");
        true
    }

    /// Move the cursor by `direction` (wrapping) and return the selected text.
    pub fn cycle(&mut self, direction: isize) -> Option<&str> {
        let len = self.items.len();
        if len == 0 {
            return None;
        }
        let len = isize::try_from(len).ok()?;
        let from = self
            .cursor
            .and_then(|c| isize::try_from(c).ok())
            .unwrap_or(-1);
        let next = usize::try_from((from + direction).rem_euclid(len)).ok()?;

        self.cursor = Some(next);
        let item = self.items.get(next)?;
        self.current.clone_from(&item.text);
        Some(item.text.as_str())
    }

    /// Text most recently added or selected.
    #[must_use]
    pub fn current(&self) -> &str {
        &self.current
    }

    /// Up to `limit` entries, newest first; all when `limit` is `None`.
    #[must_use]
    pub fn items(&self, limit: Option<usize>) -> &[ClipboardItem] {
        let end = limit.map_or(self.items.len(), |l| l.min(self.items.len()));
        &self.items[..end]
    }

    /// Remove the entry with `id`. Returns whether it existed.
    pub fn remove(&mut self, id: Uuid) -> bool {
        let Some(index) = self.items.iter().position(|item| item.id == id) else {
            return false;
        };
        self.items.remove(index);
        self.cursor = match self.cursor {
            _ if self.items.is_empty() => None,
            Some(c) if c >= index => Some(c.saturating_sub(1)),
            other => other,
        };
        true
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.items.clear();
        self.cursor = None;
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
