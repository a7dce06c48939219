//! Replicated text behind a narrow interface
//!
//! The merge algorithm belongs to the CRDT engine. Everything above this
//! module talks to it through [`ReplicatedText`]: positional edits in one
//! local transaction, change notifications with their origin, binary
//! snapshots and deltas, position anchors and local undo.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;
use yrs::types::Delta;
use yrs::{Assoc, IndexedSequence, Observable, StateVector, Subscription, Text, Transact};

use crate::anchor::PositionAnchor;
use crate::buffer::utf16_len;
use crate::document::{chunk_text, Document};
use crate::error::{Error, Result};
use crate::origin::{ChangeOrigin, OriginId};
use crate::undo::UndoScope;

/// One step of a change notification, applied left to right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextOp {
    /// Skip over unchanged text
    Retain(u32),
    /// Remove text at the current position
    Delete(u32),
    /// Insert text at the current position and move past it
    Insert(String),
}

/// Delete-then-insert at an absolute offset of the evolving document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionedEdit {
    pub index: u32,
    pub delete: u32,
    pub insert: String,
}

impl PositionedEdit {
    pub fn is_noop(&self) -> bool {
        self.delete == 0 && self.insert.is_empty()
    }
}

/// What a committed transaction did to the text, and who did it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub origin: ChangeOrigin,
    pub ops: Vec<TextOp>,
    /// Binary update carrying the change to other replicas
    pub delta: Vec<u8>,
}

/// The operations the sync engine needs from a replicated text engine.
pub trait ReplicatedText {
    /// Identity tagged on every local transaction.
    fn local_origin(&self) -> OriginId;

    fn text(&self) -> String;

    /// Length in UTF-16 code units.
    fn len(&self) -> u32;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply `edits` in order as one transaction tagged with the local origin.
    /// Returns `None` when nothing changed.
    fn apply_local(&mut self, edits: &[PositionedEdit]) -> Result<Option<StoreChange>>;

    /// Integrate a delta produced by `from`.
    fn apply_delta(&mut self, delta: &[u8], from: OriginId) -> Result<StoreChange>;

    /// Full document state as one binary update.
    fn encode_full_state(&self) -> Vec<u8>;

    /// Anchor the position currently at `index`.
    fn anchor(&self, index: u32) -> Option<PositionAnchor>;

    /// Current absolute offset of `anchor`.
    fn resolve(&self, anchor: &PositionAnchor) -> Result<u32>;

    /// Revert the latest local step. `None` when history is empty.
    fn undo(&mut self) -> Result<Option<StoreChange>>;

    /// Reapply the latest undone step. `None` when there is nothing to redo.
    fn redo(&mut self) -> Result<Option<StoreChange>>;
}

/// [`ReplicatedText`] on top of a yrs [`Document`].
pub struct YrsText {
    _subscription: Subscription,
    undo: Option<UndoScope>,
    observed: Arc<Mutex<Vec<Vec<TextOp>>>>,
    local: OriginId,
    document: Document,
}

impl YrsText {
    /// Wrap `document`, tagging local transactions with `local`.
    pub fn new(document: Document, local: OriginId) -> Self {
        let observed: Arc<Mutex<Vec<Vec<TextOp>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = observed.clone();
        let subscription = document.text_ref().observe(move |txn, event| {
            let ops = event
                .delta(txn)
                .iter()
                .map(|delta| match delta {
                    Delta::Retain(len, _) => TextOp::Retain(*len),
                    Delta::Deleted(len) => TextOp::Delete(*len),
                    Delta::Inserted(value, _) => TextOp::Insert(chunk_text(value)),
                })
                .collect();
            sink.lock().push(ops);
        });

        Self {
            _subscription: subscription,
            undo: None,
            observed,
            local,
            document,
        }
    }

    /// Replica rebuilt from a snapshot received from the relay
    pub fn from_snapshot(snapshot: &[u8], local: OriginId) -> Result<Self> {
        Ok(Self::new(Document::from_snapshot(snapshot)?, local))
    }

    /// Track local transactions for undo/redo
    pub fn with_undo(mut self) -> Self {
        self.undo = Some(UndoScope::new(&self.document, self.local));
        self
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn can_undo(&self) -> bool {
        self.undo.as_ref().is_some_and(UndoScope::can_undo)
    }

    pub fn can_redo(&self) -> bool {
        self.undo.as_ref().is_some_and(UndoScope::can_redo)
    }

    fn take_ops(&self) -> Vec<TextOp> {
        self.observed.lock().drain(..).flatten().collect()
    }

    /// Package what the observer saw since `before` as one change.
    fn finish(&self, origin: ChangeOrigin, before: &StateVector) -> Option<StoreChange> {
        let ops = self.take_ops();
        if ops.is_empty() {
            return None;
        }
        Some(StoreChange {
            origin,
            ops,
            delta: self.document.encode_since(before),
        })
    }

    fn history(&mut self, step: impl FnOnce(&mut UndoScope) -> bool) -> Result<Option<StoreChange>> {
        let before = self.document.state_vector();
        let Some(scope) = self.undo.as_mut() else {
            return Ok(None);
        };
        if !step(scope) {
            return Ok(None);
        }
        Ok(self.finish(ChangeOrigin::Local, &before))
    }
}

impl ReplicatedText for YrsText {
    fn local_origin(&self) -> OriginId {
        self.local
    }

    fn text(&self) -> String {
        self.document.text()
    }

    fn len(&self) -> u32 {
        self.document.len()
    }

    fn apply_local(&mut self, edits: &[PositionedEdit]) -> Result<Option<StoreChange>> {
        if edits.iter().all(PositionedEdit::is_noop) {
            return Ok(None);
        }

        // yrs panics on out-of-range positions, so check the whole batch first
        let mut len = self.len();
        for edit in edits {
            if edit.index + edit.delete > len {
                return Err(Error::InvalidEdit(format!(
                    "edit at {} deleting {} exceeds length {}",
                    edit.index, edit.delete, len
                )));
            }
            len = len - edit.delete + utf16_len(&edit.insert);
        }

        let before = self.document.state_vector();
        {
            let text = self.document.text_ref();
            let mut txn = self.document.ydoc().transact_mut_with(self.local.origin());
            for edit in edits {
                if edit.delete > 0 {
                    text.remove_range(&mut txn, edit.index, edit.delete);
                }
                if !edit.insert.is_empty() {
                    text.insert(&mut txn, edit.index, &edit.insert);
                }
            }
        }
        if let Some(undo) = self.undo.as_mut() {
            undo.seal();
        }

        Ok(self.finish(ChangeOrigin::Local, &before))
    }

    fn apply_delta(&mut self, delta: &[u8], from: OriginId) -> Result<StoreChange> {
        let applied = self.document.apply_update(delta, from.origin());
        let ops = self.take_ops();
        applied?;

        trace!(from = %from, ops = ops.len(), "Integrated delta");
        Ok(StoreChange {
            origin: ChangeOrigin::classify(from, self.local),
            ops,
            delta: delta.to_vec(),
        })
    }

    fn encode_full_state(&self) -> Vec<u8> {
        self.document.encode_state()
    }

    fn anchor(&self, index: u32) -> Option<PositionAnchor> {
        let len = self.len();
        if index > len {
            return None;
        }
        let text = self.document.text_ref();
        let txn = self.document.ydoc().transact();
        let sticky = if index == len {
            // Nothing follows the end of the text to attach to
            text.sticky_index(&txn, index, Assoc::Before)
        } else {
            text.sticky_index(&txn, index, Assoc::After)
        };
        sticky.map(|sticky| PositionAnchor::from_sticky(&sticky))
    }

    fn resolve(&self, anchor: &PositionAnchor) -> Result<u32> {
        let sticky = anchor.to_sticky()?;
        let len = self.len();
        let txn = self.document.ydoc().transact();
        let offset = sticky.get_offset(&txn).ok_or_else(|| {
            Error::AnchorResolution("anchor refers to content unknown to this document".into())
        })?;

        if offset.index > len {
            return Err(Error::AnchorResolution(format!(
                "anchor resolved to {} past length {}",
                offset.index, len
            )));
        }
        Ok(offset.index)
    }

    fn undo(&mut self) -> Result<Option<StoreChange>> {
        self.history(UndoScope::undo)
    }

    fn redo(&mut self) -> Result<Option<StoreChange>> {
        self.history(UndoScope::redo)
    }
}

impl std::fmt::Debug for YrsText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YrsText")
            .field("local", &self.local)
            .field("document", &self.document)
            .field("undo", &self.undo)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(at: u32, text: &str) -> PositionedEdit {
        PositionedEdit {
            index: at,
            delete: 0,
            insert: text.to_string(),
        }
    }

    fn replica(id: u64) -> YrsText {
        YrsText::new(Document::new(), OriginId::new(id)).with_undo()
    }

    /// Ship `change` from `from` into `to`.
    fn deliver(change: &StoreChange, from: &YrsText, to: &mut YrsText) -> StoreChange {
        to.apply_delta(&change.delta, from.local_origin()).unwrap()
    }

    #[test]
    fn test_local_batch_produces_delta() {
        let mut a = replica(1);
        let mut b = replica(2);

        let change = a.apply_local(&[insert(0, "hello")]).unwrap().unwrap();
        assert_eq!(change.origin, ChangeOrigin::Local);
        assert_eq!(change.ops, vec![TextOp::Insert("hello".into())]);

        let remote = deliver(&change, &a, &mut b);
        assert_eq!(remote.origin, ChangeOrigin::Remote(OriginId::new(1)));
        assert_eq!(remote.ops, vec![TextOp::Insert("hello".into())]);
        assert_eq!(b.text(), "hello");
    }

    #[test]
    fn test_noop_batch_is_skipped() {
        let mut a = replica(1);
        assert!(a.apply_local(&[]).unwrap().is_none());
        assert!(a.apply_local(&[insert(0, "")]).unwrap().is_none());
    }

    #[test]
    fn test_out_of_range_edit_is_rejected() {
        let mut a = replica(1);
        a.apply_local(&[insert(0, "abc")]).unwrap();

        let bad = PositionedEdit {
            index: 2,
            delete: 5,
            insert: String::new(),
        };
        assert!(matches!(a.apply_local(&[bad]), Err(Error::InvalidEdit(_))));
        assert_eq!(a.text(), "abc");
    }

    #[test]
    fn test_remote_ops_use_sequential_offsets() {
        let mut a = replica(1);
        let mut b = replica(2);
        let seed = a.apply_local(&[insert(0, "abcdef")]).unwrap().unwrap();
        deliver(&seed, &a, &mut b);

        let edit = a
            .apply_local(&[
                PositionedEdit {
                    index: 1,
                    delete: 2,
                    insert: String::new(),
                },
                insert(3, "XY"),
            ])
            .unwrap()
            .unwrap();
        assert_eq!(a.text(), "adeXYf");

        let remote = deliver(&edit, &a, &mut b);
        assert_eq!(
            remote.ops,
            vec![
                TextOp::Retain(1),
                TextOp::Delete(2),
                TextOp::Retain(2),
                TextOp::Insert("XY".into()),
            ]
        );
        assert_eq!(b.text(), "adeXYf");
    }

    #[test]
    fn test_corrupt_delta_is_a_merge_error() {
        let mut a = replica(1);
        let result = a.apply_delta(&[1, 2, 3], OriginId::new(9));
        assert!(matches!(result, Err(Error::Merge(_))));
        assert_eq!(a.text(), "");
    }

    #[test]
    fn test_anchor_moves_with_concurrent_insert() {
        let mut a = replica(1);
        let mut b = replica(2);
        let seed = a.apply_local(&[insert(0, "abcdef")]).unwrap().unwrap();
        deliver(&seed, &a, &mut b);

        let anchor = a.anchor(4).unwrap();
        assert_eq!(a.resolve(&anchor).unwrap(), 4);

        let remote = b.apply_local(&[insert(1, "XYZ")]).unwrap().unwrap();
        deliver(&remote, &b, &mut a);

        assert_eq!(a.text(), "aXYZbcdef");
        assert_eq!(a.resolve(&anchor).unwrap(), 7);
    }

    #[test]
    fn test_anchor_resolves_on_other_replicas() {
        let mut a = replica(1);
        let mut b = replica(2);
        let seed = a.apply_local(&[insert(0, "abcdef")]).unwrap().unwrap();
        deliver(&seed, &a, &mut b);

        let anchor = a.anchor(2).unwrap();
        assert_eq!(b.resolve(&anchor).unwrap(), 2);
    }

    #[test]
    fn test_anchor_at_end_of_text() {
        let mut a = replica(1);
        let mut b = replica(2);
        assert_eq!(a.resolve(&a.anchor(0).unwrap()).unwrap(), 0);

        let typed = a.apply_local(&[insert(0, "hello")]).unwrap().unwrap();
        deliver(&typed, &a, &mut b);

        let caret = a.anchor(5).unwrap();
        assert_eq!(a.resolve(&caret).unwrap(), 5);
        assert_eq!(b.resolve(&caret).unwrap(), 5);
        assert!(a.anchor(6).is_none());

        let prefix = b.apply_local(&[insert(0, ">> ")]).unwrap().unwrap();
        deliver(&prefix, &b, &mut a);
        assert_eq!(a.resolve(&caret).unwrap(), 8);
    }

    #[test]
    fn test_remote_embed_counts_one_unit() {
        let mut a = replica(1);
        let mut b = replica(2);
        let seed = a.apply_local(&[insert(0, "ab")]).unwrap().unwrap();
        deliver(&seed, &a, &mut b);

        let before = b.document().state_vector();
        {
            let mut txn = b.document().ydoc().transact_mut();
            b.document().text_ref().insert_embed(&mut txn, 1, 5.0);
        }
        b.take_ops();
        let embed = b.document().encode_since(&before);

        let remote = a.apply_delta(&embed, OriginId::new(2)).unwrap();
        assert_eq!(
            remote.ops,
            vec![TextOp::Retain(1), TextOp::Insert("\u{FFFC}".into())]
        );
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn test_anchor_from_foreign_document_fails() {
        let mut a = replica(1);
        let mut stranger = replica(3);
        a.apply_local(&[insert(0, "abcdef")]).unwrap();
        stranger.apply_local(&[insert(0, "unrelated")]).unwrap();

        let anchor = a.anchor(3).unwrap();
        assert!(matches!(
            stranger.resolve(&anchor),
            Err(Error::AnchorResolution(_))
        ));
    }

    #[test]
    fn test_undo_reverts_only_local_edit() {
        let mut a = replica(1);
        let mut b = replica(2);

        let local = a.apply_local(&[insert(0, "hello")]).unwrap().unwrap();
        deliver(&local, &a, &mut b);

        let remote = b.apply_local(&[insert(5, " world")]).unwrap().unwrap();
        deliver(&remote, &b, &mut a);
        assert_eq!(a.text(), "hello world");

        let inverse = a.undo().unwrap().unwrap();
        assert_eq!(inverse.origin, ChangeOrigin::Local);
        assert_eq!(a.text(), " world");

        deliver(&inverse, &a, &mut b);
        assert_eq!(b.text(), " world");
    }

    #[test]
    fn test_remote_edits_are_not_undoable() {
        let mut a = replica(1);
        let mut b = replica(2);

        let remote = b.apply_local(&[insert(0, "theirs")]).unwrap().unwrap();
        deliver(&remote, &b, &mut a);

        assert!(!a.can_undo());
        assert!(a.undo().unwrap().is_none());
        assert_eq!(a.text(), "theirs");
    }

    #[test]
    fn test_each_batch_is_one_undo_step() {
        let mut a = replica(1);
        a.apply_local(&[insert(0, "one")]).unwrap();
        a.apply_local(&[insert(3, " two")]).unwrap();

        a.undo().unwrap().unwrap();
        assert_eq!(a.text(), "one");

        let redo = a.redo().unwrap().unwrap();
        assert_eq!(redo.origin, ChangeOrigin::Local);
        assert_eq!(a.text(), "one two");
    }

    #[test]
    fn test_replica_without_history() {
        let mut plain = YrsText::new(Document::new(), OriginId::new(5));
        plain.apply_local(&[insert(0, "x")]).unwrap();
        assert!(plain.undo().unwrap().is_none());
        assert_eq!(plain.text(), "x");
    }
}
