//! Local-only undo history

use tracing::debug;
use yrs::UndoManager;

use crate::document::Document;
use crate::origin::OriginId;

/// Undo/redo restricted to mutations made by one session.
///
/// Only transactions tagged with the local origin are captured; deltas
/// integrated from other sessions never enter the stacks, so undo can not
/// revert somebody else's text. The history lives as long as the session.
pub struct UndoScope {
    manager: UndoManager,
    local: OriginId,
}

impl UndoScope {
    pub fn new(document: &Document, local: OriginId) -> Self {
        let mut manager = UndoManager::new(document.ydoc(), document.text_ref());
        manager.include_origin(local.origin());
        Self { manager, local }
    }

    /// Close the current undo step so the next local batch starts a new one.
    pub fn seal(&mut self) {
        self.manager.reset();
    }

    /// Revert the most recent local step. Returns false when there is none.
    pub fn undo(&mut self) -> bool {
        let undone = self.manager.undo_blocking();
        debug!(origin = %self.local, undone, "Undo");
        undone
    }

    /// Reapply the most recently undone step. Returns false when there is none.
    pub fn redo(&mut self) -> bool {
        let redone = self.manager.redo_blocking();
        debug!(origin = %self.local, redone, "Redo");
        redone
    }

    pub fn can_undo(&self) -> bool {
        self.manager.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.manager.can_redo()
    }
}

impl std::fmt::Debug for UndoScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoScope")
            .field("local", &self.local)
            .field("can_undo", &self.can_undo())
            .field("can_redo", &self.can_redo())
            .finish()
    }
}
