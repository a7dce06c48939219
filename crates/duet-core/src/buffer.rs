//! Local editable buffer and the edit batches applied to it
//!
//! Offsets are UTF-16 code units throughout, the unit Yjs peers and browser
//! editors agree on. [`RopeBuffer`] converts them to rope character indices.

use ropey::Rope;

use crate::error::{Error, Result};

/// Length of `text` in UTF-16 code units.
pub fn utf16_len(text: &str) -> u32 {
    text.encode_utf16().count() as u32
}

/// The editor-side text a session keeps in sync with the replica.
pub trait LocalBuffer {
    /// Length in UTF-16 code units.
    fn len(&self) -> u32;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `offset` falls between two characters, never inside a
    /// surrogate pair.
    fn is_char_boundary(&self, offset: u32) -> bool;

    /// Replace `[from, to)` with `text`.
    fn replace(&mut self, from: u32, to: u32, text: &str) -> Result<()>;

    fn text(&self) -> String;
}

/// [`LocalBuffer`] backed by a rope.
#[derive(Debug, Clone, Default)]
pub struct RopeBuffer {
    rope: Rope,
}

impl RopeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rope(&self) -> &Rope {
        &self.rope
    }
}

impl From<&str> for RopeBuffer {
    fn from(text: &str) -> Self {
        Self {
            rope: Rope::from_str(text),
        }
    }
}

impl LocalBuffer for RopeBuffer {
    fn len(&self) -> u32 {
        self.rope.len_utf16_cu() as u32
    }

    fn is_char_boundary(&self, offset: u32) -> bool {
        let offset = offset as usize;
        offset <= self.rope.len_utf16_cu()
            && self.rope.char_to_utf16_cu(self.rope.utf16_cu_to_char(offset)) == offset
    }

    fn replace(&mut self, from: u32, to: u32, text: &str) -> Result<()> {
        let len = self.len();
        if from > to || to > len {
            return Err(Error::InvalidEdit(format!(
                "range {}..{} outside buffer of length {}",
                from, to, len
            )));
        }
        if !self.is_char_boundary(from) || !self.is_char_boundary(to) {
            return Err(Error::InvalidEdit(format!(
                "range {}..{} splits a surrogate pair",
                from, to
            )));
        }

        let start = self.rope.utf16_cu_to_char(from as usize);
        let end = self.rope.utf16_cu_to_char(to as usize);
        if end > start {
            self.rope.remove(start..end);
        }
        if !text.is_empty() {
            self.rope.insert(start, text);
        }
        Ok(())
    }

    fn text(&self) -> String {
        self.rope.to_string()
    }
}

/// One replaced range, in the coordinates of the text before the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub from: u32,
    pub to: u32,
    pub insert: String,
}

impl Change {
    pub fn insert(at: u32, text: impl Into<String>) -> Self {
        Self {
            from: at,
            to: at,
            insert: text.into(),
        }
    }

    pub fn delete(from: u32, to: u32) -> Self {
        Self {
            from,
            to,
            insert: String::new(),
        }
    }

    pub fn replace(from: u32, to: u32, text: impl Into<String>) -> Self {
        Self {
            from,
            to,
            insert: text.into(),
        }
    }

    pub fn deleted_len(&self) -> u32 {
        self.to - self.from
    }

    pub fn is_noop(&self) -> bool {
        self.from == self.to && self.insert.is_empty()
    }
}

/// Cursor or selection: `anchor` stays put, `head` is where the caret is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Selection {
    pub anchor: u32,
    pub head: u32,
}

impl Selection {
    pub fn cursor(at: u32) -> Self {
        Self { anchor: at, head: at }
    }

    pub fn range(anchor: u32, head: u32) -> Self {
        Self { anchor, head }
    }

    pub fn is_empty(&self) -> bool {
        self.anchor == self.head
    }

    /// Keep both ends inside a document of `len` code units.
    pub fn clamp(self, len: u32) -> Self {
        Self {
            anchor: self.anchor.min(len),
            head: self.head.min(len),
        }
    }

    /// Move both ends through `changes`, given in pre-edit coordinates.
    pub fn map_through(self, changes: &[Change]) -> Self {
        Self {
            anchor: map_position(self.anchor, changes),
            head: map_position(self.head, changes),
        }
    }
}

/// Text inserted at `pos` lands before it; a position inside a deleted
/// range moves to the end of its replacement.
fn map_position(pos: u32, changes: &[Change]) -> u32 {
    let mut shift: i64 = 0;
    for change in changes {
        if change.from > pos {
            break;
        }
        let inserted = i64::from(utf16_len(&change.insert));
        if change.to <= pos {
            shift += inserted - i64::from(change.deleted_len());
        } else {
            return (i64::from(change.from) + shift + inserted) as u32;
        }
    }
    (i64::from(pos) + shift) as u32
}

/// A set of disjoint changes applied together, optionally moving the selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditBatch {
    changes: Vec<Change>,
    selection: Option<Selection>,
}

impl EditBatch {
    pub fn new(changes: Vec<Change>) -> Self {
        Self {
            changes,
            selection: None,
        }
    }

    pub fn single(change: Change) -> Self {
        Self::new(vec![change])
    }

    /// Selection to publish once the batch is applied.
    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn selection(&self) -> Option<Selection> {
        self.selection
    }

    /// True when applying the batch would not modify any text.
    pub fn is_noop(&self) -> bool {
        self.changes.iter().all(Change::is_noop)
    }

    /// Ranges must be well-formed, ascending, non-overlapping and inside `len`.
    pub fn validate<B: LocalBuffer + ?Sized>(&self, buffer: &B) -> Result<()> {
        let len = buffer.len();
        let mut previous_end = 0;
        for (i, change) in self.changes.iter().enumerate() {
            if change.from > change.to {
                return Err(Error::InvalidEdit(format!(
                    "change {} has from {} after to {}",
                    i, change.from, change.to
                )));
            }
            if change.to > len {
                return Err(Error::InvalidEdit(format!(
                    "change {} ends at {} past length {}",
                    i, change.to, len
                )));
            }
            if !buffer.is_char_boundary(change.from) || !buffer.is_char_boundary(change.to) {
                return Err(Error::InvalidEdit(format!(
                    "change {} splits a surrogate pair at {}..{}",
                    i, change.from, change.to
                )));
            }
            if change.from < previous_end {
                return Err(Error::InvalidEdit(format!(
                    "change {} overlaps or precedes the previous change",
                    i
                )));
            }
            previous_end = change.to;
        }
        Ok(())
    }
}
