use std::collections::VecDeque;

use crate::canvas::RasterImage;

// ============================================================================
// HISTORY MANAGER — bounded undo/redo over full-image snapshots
// ============================================================================

/// Undo/redo stacks of structurally independent base-image snapshots.
///
/// Every entry is an owned deep copy: mutating the live image after `push`
/// can never be observed through a stored snapshot. Eviction happens on the
/// undo side only, oldest first.
pub struct HistoryManager {
    undo_stack: VecDeque<RasterImage>,
    redo_stack: VecDeque<RasterImage>,
    max_history_size: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(20)
    }
}

impl HistoryManager {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_history_size: max_history_size.max(1),
        }
    }

    /// Record the pre-mutation image. Call before every destructive change.
    /// An absent image is a no-op and leaves the redo stack alone.
    pub fn push(&mut self, image: Option<&RasterImage>) {
        let Some(image) = image else { return };
        self.undo_stack.push_back(image.clone());
        self.prune();
        self.redo_stack.clear();
    }

    /// Pop the most recent snapshot. `current` (if present) is moved onto the
    /// redo stack first. Returns `None` on an empty undo stack.
    pub fn undo(&mut self, current: Option<&RasterImage>) -> Option<RasterImage> {
        let previous = self.undo_stack.pop_back()?;
        if let Some(current) = current {
            self.redo_stack.push_back(current.clone());
        }
        Some(previous)
    }

    /// Mirror of [`undo`](Self::undo) using the redo stack.
    pub fn redo(&mut self, current: Option<&RasterImage>) -> Option<RasterImage> {
        let next = self.redo_stack.pop_back()?;
        if let Some(current) = current {
            self.undo_stack.push_back(current.clone());
            self.prune();
        }
        Some(next)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn max_history_size(&self) -> usize {
        self.max_history_size
    }

    /// Bytes held by both stacks.
    pub fn memory_usage(&self) -> usize {
        self.undo_stack
            .iter()
            .chain(self.redo_stack.iter())
            .map(RasterImage::memory_bytes)
            .sum()
    }

    /// Drop everything. Called when a new base image is loaded.
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    fn prune(&mut self) {
        while self.undo_stack.len() > self.max_history_size {
            self.undo_stack.pop_front();
        }
    }
}
