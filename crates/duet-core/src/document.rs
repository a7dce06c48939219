//! The shared document: one yrs text replica

use std::panic;

use yrs::types::text::YChange;
use yrs::updates::decoder::Decode;
use yrs::{
    Any, Doc, OffsetKind, Options, Origin, Out, ReadTxn, StateVector, Text, TextRef, Transact,
    Update, WriteTxn,
};

use crate::error::{Error, Result};

/// Name of the shared text type. Matches the browser clients.
pub const TEXT_NAME: &str = "y-document";

/// Stands in for an embedded value. Embeds occupy one offset unit in the
/// text, and so does this character.
pub const EMBED_PLACEHOLDER: char = '\u{FFFC}';

/// Plain-text rendering of one inserted chunk
pub(crate) fn chunk_text(value: &Out) -> String {
    match value {
        Out::Any(Any::String(s)) => s.to_string(),
        _ => EMBED_PLACEHOLDER.to_string(),
    }
}

/// Decode a v2 update. The lib0 decoder panics on some truncated inputs;
/// that is reported like any other decoding failure.
fn decode_update(bytes: &[u8]) -> std::result::Result<Update, String> {
    match panic::catch_unwind(|| Update::decode_v2(bytes)) {
        Ok(Ok(update)) => Ok(update),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("malformed update of {} bytes", bytes.len())),
    }
}

/// A replica of the shared text.
///
/// Offsets are counted in UTF-16 code units so that deltas, anchors and
/// editor positions agree with Yjs peers.
pub struct Document {
    ydoc: Doc,
    text: TextRef,
}

impl Document {
    /// Create an empty replica
    pub fn new() -> Self {
        let ydoc = Doc::with_options(Options {
            offset_kind: OffsetKind::Utf16,
            ..Options::default()
        });
        let text = {
            let mut txn = ydoc.transact_mut();
            txn.get_or_insert_text(TEXT_NAME)
        };
        Self { ydoc, text }
    }

    /// Create a replica whose text starts as `content`
    pub fn with_content(content: &str) -> Self {
        let doc = Self::new();
        if !content.is_empty() {
            let mut txn = doc.ydoc.transact_mut();
            doc.text.insert(&mut txn, 0, content);
        }
        doc
    }

    /// Rebuild a replica from a full-state snapshot
    pub fn from_snapshot(snapshot: &[u8]) -> Result<Self> {
        let doc = Self::new();
        let update = decode_update(snapshot).map_err(Error::Snapshot)?;
        {
            let mut txn = doc.ydoc.transact_mut();
            txn.apply_update(update)
                .map_err(|e| Error::Snapshot(e.to_string()))?;
        }
        Ok(doc)
    }

    /// Current text content, with [`EMBED_PLACEHOLDER`] for each embed
    pub fn text(&self) -> String {
        let txn = self.ydoc.transact();
        self.text
            .diff(&txn, YChange::identity)
            .iter()
            .map(|chunk| chunk_text(&chunk.insert))
            .collect()
    }

    /// Length in UTF-16 code units
    pub fn len(&self) -> u32 {
        crate::buffer::utf16_len(&self.text())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encode the whole document as one update (for snapshots)
    pub fn encode_state(&self) -> Vec<u8> {
        let txn = self.ydoc.transact();
        txn.encode_state_as_update_v2(&StateVector::default())
    }

    /// Everything integrated since `since`, including the full delete set
    pub fn encode_since(&self, since: &StateVector) -> Vec<u8> {
        let txn = self.ydoc.transact();
        txn.encode_state_as_update_v2(since)
    }

    pub fn state_vector(&self) -> StateVector {
        self.ydoc.transact().state_vector()
    }

    /// Apply an update received from another replica.
    ///
    /// The update is fully decoded before the document is touched, so a
    /// corrupt payload leaves the replica unchanged.
    pub fn apply_update(&self, update: &[u8], origin: Origin) -> Result<()> {
        let decoded = decode_update(update).map_err(Error::Merge)?;
        let mut txn = self.ydoc.transact_mut_with(origin);
        txn.apply_update(decoded)
            .map_err(|e| Error::Merge(e.to_string()))?;
        Ok(())
    }

    pub(crate) fn ydoc(&self) -> &Doc {
        &self.ydoc
    }

    pub(crate) fn text_ref(&self) -> &TextRef {
        &self.text
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("len", &self.len())
            .finish()
    }
}
