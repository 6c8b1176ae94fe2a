use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

const COALESCE_WINDOW_MS: u128 = 500;
const MAX_HISTORY_STEPS: usize = 100;
const MAX_HISTORY_BYTES: usize = 10 * 1024 * 1024;

/// Full editor content at one point in time: the body plus every header and
/// footer variant. Chrome is captured even for body-only edits so an undo
/// never resurrects a header the user already changed.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct DocSnapshot {
    pub body: String,
    pub header: String,
    pub footer: String,
    pub first_page_header: String,
    pub first_page_footer: String,
    pub even_page_header: String,
    pub even_page_footer: String,
}

impl DocSnapshot {
    pub fn byte_size(&self) -> usize {
        self.body.len()
            + self.header.len()
            + self.footer.len()
            + self.first_page_header.len()
            + self.first_page_footer.len()
            + self.even_page_header.len()
            + self.even_page_footer.len()
    }
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    snapshot: DocSnapshot,
    bytes: usize,
    timestamp_ms: u128,
    debounced: bool,
}

/// Linear snapshot history with a cursor. Entries before the cursor are the
/// undo trail, entries after it the redo trail; pushing a new snapshot
/// truncates everything past the cursor.
#[derive(Debug)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
    cursor: usize,
    used_bytes: usize,
    max_steps: usize,
    max_bytes: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::with_limits(MAX_HISTORY_STEPS, MAX_HISTORY_BYTES)
    }
}

impl History {
    pub fn with_limits(max_steps: usize, max_bytes: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cursor: 0,
            used_bytes: 0,
            max_steps: max_steps.max(2),
            max_bytes: max_bytes.max(64 * 1024),
        }
    }

    /// Seeds the history with the content present at construction. Clears any
    /// previous state.
    pub fn init(&mut self, snapshot: DocSnapshot, now_ms: u128) {
        self.entries.clear();
        self.cursor = 0;
        self.used_bytes = snapshot.byte_size();
        self.entries.push_back(HistoryEntry {
            bytes: snapshot.byte_size(),
            snapshot,
            timestamp_ms: now_ms,
            debounced: false,
        });
    }

    pub fn push(&mut self, snapshot: DocSnapshot, now_ms: u128) {
        self.push_entry(snapshot, now_ms, false);
    }

    /// Push for keystroke-grade edits. While pushes keep arriving inside the
    /// coalescing window the top entry is overwritten in place, so a typing
    /// burst costs one history step.
    pub fn push_debounced(&mut self, snapshot: DocSnapshot, now_ms: u128) {
        self.push_entry(snapshot, now_ms, true);
    }

    fn push_entry(&mut self, snapshot: DocSnapshot, now_ms: u128, debounced: bool) {
        if let Some(current) = self.entries.get(self.cursor) {
            if current.snapshot == snapshot {
                return;
            }
        }

        // A new push after undo abandons the redo branch.
        while self.entries.len() > self.cursor + 1 {
            if let Some(dropped) = self.entries.pop_back() {
                self.used_bytes = self.used_bytes.saturating_sub(dropped.bytes);
            }
        }

        if debounced {
            if let Some(top) = self.entries.back_mut() {
                let elapsed = now_ms.saturating_sub(top.timestamp_ms);
                if top.debounced && elapsed <= COALESCE_WINDOW_MS {
                    self.used_bytes = self.used_bytes.saturating_sub(top.bytes);
                    top.bytes = snapshot.byte_size();
                    top.snapshot = snapshot;
                    top.timestamp_ms = now_ms;
                    self.used_bytes += top.bytes;
                    self.enforce_limits();
                    return;
                }
            }
        }

        let bytes = snapshot.byte_size();
        self.used_bytes += bytes;
        self.entries.push_back(HistoryEntry {
            snapshot,
            bytes,
            timestamp_ms: now_ms,
            debounced,
        });
        self.cursor = self.entries.len() - 1;
        self.enforce_limits();
    }

    pub fn undo(&mut self) -> Option<DocSnapshot> {
        if self.cursor == 0 {
            return None;
        }
        self.settle_top();
        self.cursor -= 1;
        self.entries.get(self.cursor).map(|e| e.snapshot.clone())
    }

    pub fn redo(&mut self) -> Option<DocSnapshot> {
        if self.cursor + 1 >= self.entries.len() {
            return None;
        }
        self.settle_top();
        self.cursor += 1;
        self.entries.get(self.cursor).map(|e| e.snapshot.clone())
    }

    // Once the user navigates history, the latest burst is final; nothing may
    // coalesce into it afterwards.
    fn settle_top(&mut self) {
        if let Some(top) = self.entries.back_mut() {
            top.debounced = false;
        }
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    fn enforce_limits(&mut self) {
        while self.entries.len() > 1
            && (self.entries.len() > self.max_steps || self.used_bytes > self.max_bytes)
        {
            if let Some(front) = self.entries.pop_front() {
                self.used_bytes = self.used_bytes.saturating_sub(front.bytes);
                self.cursor = self.cursor.saturating_sub(1);
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(text: &str) -> DocSnapshot {
        DocSnapshot {
            body: text.to_string(),
            ..Default::default()
        }
    }

    fn seeded() -> History {
        let mut history = History::default();
        history.init(body("start"), 0);
        history
    }

    #[test]
    fn duplicate_snapshots_do_not_grow_history() {
        let mut history = seeded();
        history.push(body("a"), 1_000);
        history.push(body("a"), 2_000);
        history.push(body("a"), 3_000);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn undo_then_redo_round_trips() {
        let mut history = seeded();
        history.push(body("edited"), 1_000);
        let undone = history.undo().unwrap();
        assert_eq!(undone.body, "start");
        let redone = history.redo().unwrap();
        assert_eq!(redone.body, "edited");
    }

    #[test]
    fn boundaries_return_none() {
        let mut history = seeded();
        assert!(history.undo().is_none());
        assert!(history.redo().is_none());
        history.push(body("a"), 1_000);
        assert!(history.undo().is_some());
        assert!(history.undo().is_none());
        assert!(history.redo().is_some());
        assert!(history.redo().is_none());
    }

    #[test]
    fn push_after_undo_discards_redo_branch() {
        let mut history = seeded();
        history.push(body("a"), 1_000);
        history.push(body("b"), 2_000);
        history.undo();
        history.push(body("c"), 3_000);
        assert!(!history.can_redo());
        assert_eq!(history.undo().unwrap().body, "a");
        assert_eq!(history.redo().unwrap().body, "c");
    }

    #[test]
    fn typing_burst_coalesces_into_one_entry() {
        let mut history = seeded();
        history.push_debounced(body("h"), 1_000);
        history.push_debounced(body("he"), 1_200);
        history.push_debounced(body("hel"), 1_400);
        history.push_debounced(body("hello"), 1_700);
        assert_eq!(history.len(), 2);
        assert_eq!(history.undo().unwrap().body, "start");
        assert_eq!(history.redo().unwrap().body, "hello");
    }

    #[test]
    fn pause_past_the_window_commits_a_new_entry() {
        let mut history = seeded();
        history.push_debounced(body("draft"), 1_000);
        history.push_debounced(body("draft two"), 2_000);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn plain_push_never_overwrites_a_debounced_top() {
        let mut history = seeded();
        history.push_debounced(body("typed"), 1_000);
        history.push(body("pasted"), 1_100);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn eviction_drops_oldest_entries_first() {
        let mut history = History::with_limits(4, usize::MAX);
        history.init(body("0"), 0);
        for i in 1..10 {
            history.push(body(&i.to_string()), i as u128 * 1_000);
        }
        assert_eq!(history.len(), 4);
        // Walking back stops at the oldest surviving entry.
        let mut last = String::new();
        while let Some(snapshot) = history.undo() {
            last = snapshot.body;
        }
        assert_eq!(last, "6");
    }

    #[test]
    fn chrome_fields_participate_in_equality() {
        let mut history = seeded();
        let mut with_header = body("start");
        with_header.header = "<p>h</p>".to_string();
        history.push(with_header, 1_000);
        assert_eq!(history.len(), 2);
    }
}
