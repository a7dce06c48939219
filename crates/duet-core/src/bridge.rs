//! Two-way binding between the local buffer and the replicated text

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::buffer::{utf16_len, Change, EditBatch, LocalBuffer, RopeBuffer};
use crate::codec::b64;
use crate::error::{Error, Result};
use crate::origin::OriginId;
use crate::text::{PositionedEdit, ReplicatedText, StoreChange, TextOp, YrsText};

/// A binary update and the session that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(with = "b64")]
    pub update: Vec<u8>,
    pub from: OriginId,
}

/// Keeps a [`LocalBuffer`] and a [`ReplicatedText`] holding the same text.
///
/// Local batches go to the store first and then to the buffer with the
/// same adjusted offsets. Store changes are replayed into the buffer unless
/// they came from this session. Every method takes `&mut self`, so a local
/// batch and a remote delta can never interleave.
pub struct LocalBufferBridge<B = RopeBuffer, S = YrsText> {
    buffer: B,
    store: S,
}

impl LocalBufferBridge<RopeBuffer, YrsText> {
    /// Session replica built from a relay snapshot, with undo history
    pub fn from_snapshot(snapshot: &[u8], local: OriginId) -> Result<Self> {
        let store = YrsText::from_snapshot(snapshot, local)?.with_undo();
        let buffer = RopeBuffer::from(store.text().as_str());
        Self::new(buffer, store)
    }
}

impl<B: LocalBuffer, S: ReplicatedText> LocalBufferBridge<B, S> {
    /// Bind `buffer` to `store`. Both must start with the same text.
    pub fn new(buffer: B, store: S) -> Result<Self> {
        if buffer.text() != store.text() {
            return Err(Error::InvalidEdit(
                "buffer and store start with different text".into(),
            ));
        }
        Ok(Self { buffer, store })
    }

    pub fn local(&self) -> OriginId {
        self.store.local_origin()
    }

    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn text(&self) -> String {
        self.buffer.text()
    }

    /// Apply a user edit batch and return the delta to broadcast.
    ///
    /// Returns `Ok(None)` for batches that change nothing. A rejected batch
    /// leaves both sides untouched.
    pub fn on_local_change(&mut self, batch: &EditBatch) -> Result<Option<Delta>> {
        batch.validate(&self.buffer)?;
        if batch.is_noop() {
            trace!("Skipping empty edit batch");
            return Ok(None);
        }

        // Ranges are in pre-edit coordinates; shift each by what earlier
        // ranges in the batch added or removed.
        let mut shift: i64 = 0;
        let edits: Vec<PositionedEdit> = batch
            .changes()
            .iter()
            .filter(|change| !change.is_noop())
            .map(|change| {
                let index = (i64::from(change.from) + shift) as u32;
                shift += i64::from(utf16_len(&change.insert)) - i64::from(change.deleted_len());
                PositionedEdit {
                    index,
                    delete: change.deleted_len(),
                    insert: change.insert.clone(),
                }
            })
            .collect();

        let committed = self.store.apply_local(&edits)?;
        for edit in &edits {
            self.buffer
                .replace(edit.index, edit.index + edit.delete, &edit.insert)?;
        }
        debug_assert_eq!(self.buffer.text(), self.store.text());

        Ok(committed.map(|change| {
            debug!(origin = %self.local(), edits = edits.len(), bytes = change.delta.len(), "Local edit committed");
            Delta {
                update: change.delta,
                from: self.local(),
            }
        }))
    }

    /// Replay a store change into the buffer.
    ///
    /// Changes this session made itself are already in the buffer and are
    /// discarded. Returns the buffer edits performed, each in the
    /// coordinates of the buffer at the moment it was applied.
    pub fn on_store_change(&mut self, change: &StoreChange) -> Result<Vec<Change>> {
        if change.origin.is_local() {
            trace!("Discarding echo of local change");
            return Ok(Vec::new());
        }
        self.replay(&change.ops)
    }

    /// Integrate a delta received from the relay.
    pub fn apply_remote(&mut self, delta: &Delta) -> Result<Vec<Change>> {
        if delta.from == self.local() {
            debug!(origin = %delta.from, "Ignoring delta produced by this session");
            return Ok(Vec::new());
        }
        let change = self.store.apply_delta(&delta.update, delta.from)?;
        self.on_store_change(&change)
    }

    /// Revert the latest local step. Returns the delta to broadcast.
    pub fn undo(&mut self) -> Result<Option<Delta>> {
        let change = self.store.undo()?;
        self.commit_history(change)
    }

    /// Reapply the latest undone step. Returns the delta to broadcast.
    pub fn redo(&mut self) -> Result<Option<Delta>> {
        let change = self.store.redo()?;
        self.commit_history(change)
    }

    fn commit_history(&mut self, change: Option<StoreChange>) -> Result<Option<Delta>> {
        let Some(change) = change else {
            return Ok(None);
        };
        self.replay(&change.ops)?;
        debug_assert_eq!(self.buffer.text(), self.store.text());
        Ok(Some(Delta {
            update: change.delta,
            from: self.local(),
        }))
    }

    fn replay(&mut self, ops: &[TextOp]) -> Result<Vec<Change>> {
        let mut cursor = 0;
        let mut applied = Vec::new();
        for op in ops {
            match op {
                TextOp::Retain(len) => cursor += len,
                TextOp::Delete(len) => {
                    self.buffer.replace(cursor, cursor + len, "")?;
                    applied.push(Change::delete(cursor, cursor + len));
                }
                TextOp::Insert(text) => {
                    self.buffer.replace(cursor, cursor, text)?;
                    applied.push(Change::insert(cursor, text.clone()));
                    cursor += utf16_len(text);
                }
            }
        }
        Ok(applied)
    }
}

impl<B: LocalBuffer, S: ReplicatedText> std::fmt::Debug for LocalBufferBridge<B, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBufferBridge")
            .field("local", &self.local())
            .field("len", &self.buffer.len())
            .finish()
    }
}
