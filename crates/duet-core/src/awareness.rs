//! Remote cursor presence
//!
//! Selections travel as position anchors rather than offsets, so a cursor
//! received before a concurrent edit still lands on the right character
//! after it. Presence is ephemeral: nothing here is persisted and entries
//! are only removed when the caller asks for it.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::anchor::PositionAnchor;
use crate::buffer::Selection;
use crate::error::{Error, Result};
use crate::origin::OriginId;
use crate::text::ReplicatedText;

/// A cursor color, always `#rrggbb`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(String);

impl Color {
    /// Pick a random color for a new session.
    pub fn random() -> Self {
        let bytes = Uuid::new_v4().into_bytes();
        Self(format!("#{:02x}{:02x}{:02x}", bytes[0], bytes[1], bytes[2]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Color {
    type Error = Error;

    /// Accepts `#` plus one to six hex digits; short forms are zero-padded.
    fn try_from(value: String) -> Result<Self> {
        let digits = value
            .strip_prefix('#')
            .filter(|d| (1..=6).contains(&d.len()) && d.chars().all(|c| c.is_ascii_hexdigit()))
            .ok_or_else(|| Error::InvalidColor(value.clone()))?;
        Ok(Self(format!("#{:0>6}", digits.to_ascii_lowercase())))
    }
}

impl std::str::FromStr for Color {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::try_from(s.to_string())
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.0
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Presence broadcast by one session after its selection moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwarenessUpdate {
    pub from: OriginId,
    pub color: Color,
    pub anchor: PositionAnchor,
    pub head: PositionAnchor,
}

/// Last known presence of one remote session.
#[derive(Debug, Clone)]
pub struct PeerCursor {
    pub color: Color,
    pub anchor: PositionAnchor,
    pub head: PositionAnchor,
    pub updated_at: Instant,
}

/// Decoration kind. Carets order before selections at the same offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Side {
    Caret,
    Selection,
}

/// A remote cursor or selection at absolute offsets of the current text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoration {
    pub from: u32,
    pub to: u32,
    pub side: Side,
    pub peer: OriginId,
    pub color: Color,
    /// Set on carets only
    pub label: Option<String>,
}

/// Tracks remote cursors and computes where to draw them.
#[derive(Debug)]
pub struct AwarenessTracker {
    local: OriginId,
    color: Color,
    peers: HashMap<OriginId, PeerCursor>,
    rendered: Vec<Decoration>,
}

impl AwarenessTracker {
    pub fn new(local: OriginId, color: Color) -> Self {
        Self {
            local,
            color,
            peers: HashMap::new(),
            rendered: Vec::new(),
        }
    }

    pub fn color(&self) -> &Color {
        &self.color
    }

    pub fn peers(&self) -> &HashMap<OriginId, PeerCursor> {
        &self.peers
    }

    /// Decorations from the latest render pass
    pub fn decorations(&self) -> &[Decoration] {
        &self.rendered
    }

    /// Anchor the local selection and build the update to broadcast.
    ///
    /// Always produces an update, even if the selection did not move.
    pub fn on_local_selection_change<S: ReplicatedText>(
        &self,
        store: &S,
        selection: Selection,
    ) -> Result<AwarenessUpdate> {
        let selection = selection.clamp(store.len());
        let anchor_at = |index: u32| {
            store.anchor(index).ok_or_else(|| {
                Error::AnchorResolution(format!("no position {} in document", index))
            })
        };

        Ok(AwarenessUpdate {
            from: self.local,
            color: self.color.clone(),
            anchor: anchor_at(selection.anchor)?,
            head: anchor_at(selection.head)?,
        })
    }

    /// Record a peer's presence. Returns false for our own updates.
    pub fn on_remote_awareness(&mut self, update: AwarenessUpdate) -> bool {
        if update.from == self.local {
            return false;
        }
        trace!(peer = %update.from, "Awareness received");
        self.peers.insert(
            update.from,
            PeerCursor {
                color: update.color,
                anchor: update.anchor,
                head: update.head,
                updated_at: Instant::now(),
            },
        );
        true
    }

    /// Resolve every peer against `store` and rebuild the decoration set.
    ///
    /// A peer whose anchors do not resolve is left out of this pass but
    /// keeps its entry.
    pub fn recompute_render_positions<S: ReplicatedText>(&mut self, store: &S) -> &[Decoration] {
        let mut decorations = Vec::with_capacity(self.peers.len() * 2);

        for (peer, cursor) in &self.peers {
            let resolved = store
                .resolve(&cursor.anchor)
                .and_then(|anchor| Ok((anchor, store.resolve(&cursor.head)?)));
            let (anchor, head) = match resolved {
                Ok(positions) => positions,
                Err(e) => {
                    debug!(peer = %peer, error = %e, "Skipping unresolvable cursor");
                    continue;
                }
            };

            if anchor != head {
                decorations.push(Decoration {
                    from: anchor.min(head),
                    to: anchor.max(head),
                    side: Side::Selection,
                    peer: *peer,
                    color: cursor.color.clone(),
                    label: None,
                });
            }
            decorations.push(Decoration {
                from: head,
                to: head,
                side: Side::Caret,
                peer: *peer,
                color: cursor.color.clone(),
                label: Some(format!("User {}", peer)),
            });
        }

        decorations.sort_by(|a, b| {
            (a.from, a.side, a.peer, a.to).cmp(&(b.from, b.side, b.peer, b.to))
        });
        self.rendered = decorations;
        &self.rendered
    }

    /// Forget peers not heard from for at least `max_age`. Returns how many
    /// were removed.
    pub fn prune_idle(&mut self, max_age: Duration) -> usize {
        let before = self.peers.len();
        self.peers
            .retain(|_, cursor| cursor.updated_at.elapsed() < max_age);
        let removed = before - self.peers.len();
        if removed > 0 {
            debug!(removed, "Pruned idle cursors");
        }
        removed
    }
}
