//! One editing session: buffer bridge, local selection and remote cursors

use tracing::debug;

use crate::awareness::{AwarenessTracker, AwarenessUpdate, Color, Decoration};
use crate::bridge::{Delta, LocalBufferBridge};
use crate::buffer::{EditBatch, LocalBuffer, Selection};
use crate::error::Result;
use crate::origin::OriginId;

/// Something the session wants broadcast to the other sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Update(Delta),
    Awareness(AwarenessUpdate),
}

/// Client-side state for one connection to the relay.
///
/// Decorations are recomputed after every change to the text and whenever
/// the cursor table changes, so [`ClientSession::decorations`] is always
/// current.
#[derive(Debug)]
pub struct ClientSession {
    bridge: LocalBufferBridge,
    awareness: AwarenessTracker,
    selection: Selection,
}

impl ClientSession {
    /// Start a session from the relay's snapshot.
    pub fn from_snapshot(snapshot: &[u8], local: OriginId, color: Color) -> Result<Self> {
        let bridge = LocalBufferBridge::from_snapshot(snapshot, local)?;
        debug!(origin = %local, len = bridge.buffer().len(), "Session started");
        Ok(Self {
            bridge,
            awareness: AwarenessTracker::new(local, color),
            selection: Selection::default(),
        })
    }

    pub fn local(&self) -> OriginId {
        self.bridge.local()
    }

    pub fn color(&self) -> &Color {
        self.awareness.color()
    }

    pub fn text(&self) -> String {
        self.bridge.text()
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn decorations(&self) -> &[Decoration] {
        self.awareness.decorations()
    }

    pub fn bridge(&self) -> &LocalBufferBridge {
        &self.bridge
    }

    pub fn awareness(&self) -> &AwarenessTracker {
        &self.awareness
    }

    /// Apply a local edit batch.
    ///
    /// The selection is published after every edit that changed the text:
    /// the batch's own selection if it has one, otherwise the current one
    /// mapped through the edit.
    pub fn edit(&mut self, batch: &EditBatch) -> Result<Vec<Outbound>> {
        let delta = self.bridge.on_local_change(batch)?;
        let selection = match batch.selection() {
            Some(selection) => Some(selection),
            None if delta.is_some() => Some(self.selection.map_through(batch.changes())),
            None => None,
        };

        let mut outbound = Vec::new();
        if let Some(delta) = delta {
            outbound.push(Outbound::Update(delta));
        }
        if let Some(selection) = selection {
            outbound.push(self.publish_selection(selection)?);
        }

        self.render();
        Ok(outbound)
    }

    /// Move the local selection and publish it.
    pub fn select(&mut self, selection: Selection) -> Result<Vec<Outbound>> {
        Ok(vec![self.publish_selection(selection)?])
    }

    pub fn undo(&mut self) -> Result<Vec<Outbound>> {
        let delta = self.bridge.undo()?;
        Ok(self.after_history(delta))
    }

    pub fn redo(&mut self) -> Result<Vec<Outbound>> {
        let delta = self.bridge.redo()?;
        Ok(self.after_history(delta))
    }

    /// Integrate a delta relayed from another session.
    pub fn receive_update(&mut self, delta: &Delta) -> Result<()> {
        let applied = self.bridge.apply_remote(delta)?;
        for change in &applied {
            self.selection = self.selection.map_through(std::slice::from_ref(change));
        }
        self.render();
        Ok(())
    }

    /// Record a peer's presence. Returns true when the cursor table changed.
    pub fn receive_awareness(&mut self, update: AwarenessUpdate) -> bool {
        let changed = self.awareness.on_remote_awareness(update);
        if changed {
            self.render();
        }
        changed
    }

    /// The visible part of the editor moved; positions are recomputed.
    pub fn viewport_changed(&mut self) -> &[Decoration] {
        self.render();
        self.awareness.decorations()
    }

    fn publish_selection(&mut self, selection: Selection) -> Result<Outbound> {
        self.selection = selection.clamp(self.bridge.buffer().len());
        let update = self
            .awareness
            .on_local_selection_change(self.bridge.store(), self.selection)?;
        Ok(Outbound::Awareness(update))
    }

    fn after_history(&mut self, delta: Option<Delta>) -> Vec<Outbound> {
        self.selection = self.selection.clamp(self.bridge.buffer().len());
        self.render();
        delta.map(Outbound::Update).into_iter().collect()
    }

    fn render(&mut self) {
        self.awareness
            .recompute_render_positions(self.bridge.store());
    }
}
