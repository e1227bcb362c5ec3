use std::collections::VecDeque;

use crate::canvas::MaskBuffer;

/// Default number of undo steps kept per session.
pub const DEFAULT_MAX_HISTORY: usize = 50;

// ============================================================================
// SNAPSHOT – full-mask copy
// ============================================================================

/// Immutable copy of every mask pixel at one point in time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MaskSnapshot {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl MaskSnapshot {
    pub fn capture(mask: &MaskBuffer) -> Self {
        let (width, height) = mask.dimensions();
        Self {
            width,
            height,
            pixels: mask.as_image().as_raw().clone(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Raw RGBA bytes, row-major.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn memory_size(&self) -> usize {
        self.pixels.len()
    }
}

/// One step of the edit history.
#[derive(Clone, Debug)]
pub struct HistoryEntry {
    pub description: String,
    pub snapshot: MaskSnapshot,
}

// ============================================================================
// HISTORY MANAGER – bounded linear undo/redo
// ============================================================================

/// Linear undo log of full mask snapshots.
///
/// `entries[cursor]` is the state currently applied to the mask; everything
/// after the cursor can be redone.  Pushing while the cursor is not at the
/// newest entry discards the redoable tail.  When the entry count exceeds
/// the bound, the oldest entry is evicted and the cursor shifts down with it.
pub struct HistoryManager {
    entries: VecDeque<HistoryEntry>,
    cursor: usize,
    max_history_size: usize,
    /// Running total of snapshot bytes across all entries.
    total_memory: usize,
}

impl HistoryManager {
    /// Seed the history with the mask's state at load time.  A bound of zero
    /// is raised to one so the current state is always retained.
    pub fn new(initial: MaskSnapshot, max_history_size: usize) -> Self {
        let total_memory = initial.memory_size();
        let mut entries = VecDeque::new();
        entries.push_back(HistoryEntry {
            description: "Initial Mask".to_string(),
            snapshot: initial,
        });
        Self {
            entries,
            cursor: 0,
            max_history_size: max_history_size.max(1),
            total_memory,
        }
    }

    pub fn push(&mut self, description: impl Into<String>, snapshot: MaskSnapshot) {
        // Drop the redoable branch
        for discarded in self.entries.drain(self.cursor + 1..) {
            self.total_memory = self
                .total_memory
                .saturating_sub(discarded.snapshot.memory_size());
        }

        self.total_memory += snapshot.memory_size();
        self.entries.push_back(HistoryEntry {
            description: description.into(),
            snapshot,
        });
        self.cursor = self.entries.len() - 1;

        self.prune();
    }

    /// Step back one entry and return the state to apply, or `None` when
    /// already at the oldest state.
    pub fn undo(&mut self) -> Option<&HistoryEntry> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        self.entries.get(self.cursor)
    }

    /// Step forward one entry and return the state to apply, or `None` when
    /// already at the newest state.
    pub fn redo(&mut self) -> Option<&HistoryEntry> {
        if self.cursor + 1 >= self.entries.len() {
            return None;
        }
        self.cursor += 1;
        self.entries.get(self.cursor)
    }

    pub fn current(&self) -> &HistoryEntry {
        &self.entries[self.cursor]
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

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn max_history_size(&self) -> usize {
        self.max_history_size
    }

    pub fn undo_count(&self) -> usize {
        self.cursor
    }

    pub fn redo_count(&self) -> usize {
        self.entries.len() - 1 - self.cursor
    }

    pub fn undo_description(&self) -> Option<&str> {
        if self.can_undo() {
            Some(self.current().description.as_str())
        } else {
            None
        }
    }

    pub fn redo_description(&self) -> Option<&str> {
        self.entries
            .get(self.cursor + 1)
            .map(|e| e.description.as_str())
    }

    /// Current memory usage of all snapshots (O(1) via cached total)
    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    fn prune(&mut self) {
        while self.entries.len() > self.max_history_size {
            if let Some(removed) = self.entries.pop_front() {
                self.total_memory = self
                    .total_memory
                    .saturating_sub(removed.snapshot.memory_size());
                self.cursor = self.cursor.saturating_sub(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{PaintMode, Point};

    /// Distinct snapshots: a 64×1 mask with `n` restored pixels.
    fn snap(n: u32) -> MaskSnapshot {
        let mut mask = MaskBuffer::filled(64, 1, PaintMode::Erase);
        for x in 0..n {
            mask.paint_circle(Point::new(x as f32 + 0.5, 0.5), 0.5, PaintMode::Restore);
        }
        mask.snapshot()
    }

    #[test]
    fn push_moves_cursor_to_newest() {
        let mut history = HistoryManager::new(snap(0), 50);
        history.push("a", snap(1));
        history.push("b", snap(2));
        assert_eq!(history.cursor(), history.len() - 1);
        assert_eq!(history.current().snapshot, snap(2));
        assert_eq!(history.current().description, "b");
    }

    #[test]
    fn undo_then_redo_is_identity() {
        let mut history = HistoryManager::new(snap(0), 50);
        history.push("a", snap(1));
        history.push("b", snap(2));
        let before = history.current().snapshot.clone();
        assert_eq!(history.undo().map(|e| e.snapshot.clone()), Some(snap(1)));
        assert_eq!(history.redo().map(|e| e.snapshot.clone()), Some(before.clone()));
        assert_eq!(history.current().snapshot, before);
        assert!(history.redo().is_none());
        assert_eq!(history.current().snapshot, before);
    }

    #[test]
    fn undo_at_oldest_is_noop() {
        let mut history = HistoryManager::new(snap(0), 50);
        assert!(!history.can_undo());
        assert!(history.undo().is_none());
        assert_eq!(history.cursor(), 0);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn push_after_undo_discards_branch() {
        let mut history = HistoryManager::new(snap(0), 50);
        history.push("1", snap(1));
        history.push("2", snap(2));
        history.push("3", snap(3));
        history.undo();
        history.undo();
        assert_eq!(history.redo_count(), 2);
        assert_eq!(history.undo_count(), 1);
        history.push("new", snap(9));
        assert_eq!(history.len(), 3);
        assert!(!history.can_redo());
        assert!(history.redo().is_none());
        // Walk all the way back: the discarded snapshots never show up.
        let mut seen = vec![history.current().snapshot.clone()];
        while let Some(entry) = history.undo() {
            seen.push(entry.snapshot.clone());
        }
        assert_eq!(seen, vec![snap(9), snap(1), snap(0)]);
    }

    #[test]
    fn bound_evicts_oldest() {
        let mut history = HistoryManager::new(snap(0), 5);
        for i in 1..=12 {
            history.push(format!("{}", i), snap(i));
        }
        assert_eq!(history.len(), 5);
        assert_eq!(history.cursor(), 4);
        assert_eq!(history.current().snapshot, snap(12));
        let mut oldest = None;
        while let Some(entry) = history.undo() {
            oldest = Some(entry.snapshot.clone());
        }
        assert_eq!(oldest, Some(snap(8)));
    }

    #[test]
    fn eviction_keeps_memory_total_in_sync() {
        let mut history = HistoryManager::new(snap(0), 3);
        for i in 1..=6 {
            history.push("s", snap(i));
        }
        assert_eq!(history.memory_usage(), 3 * 64 * 4);
        history.undo();
        history.push("t", snap(40));
        assert_eq!(history.memory_usage(), 3 * 64 * 4);
    }

    #[test]
    fn zero_bound_still_holds_current() {
        let mut history = HistoryManager::new(snap(0), 0);
        history.push("a", snap(1));
        assert_eq!(history.len(), 1);
        assert_eq!(history.current().snapshot, snap(1));
        assert!(!history.can_undo());
    }

    #[test]
    fn descriptions_follow_cursor() {
        let mut history = HistoryManager::new(snap(0), 50);
        assert_eq!(history.undo_description(), None);
        history.push("Erase Stroke", snap(1));
        assert_eq!(history.undo_description(), Some("Erase Stroke"));
        history.undo();
        assert_eq!(history.redo_description(), Some("Erase Stroke"));
    }
}
