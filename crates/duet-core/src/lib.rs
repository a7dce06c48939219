//! Duet Core - Replicated Text Synchronization
//!
//! This crate provides the client-side synchronization engine for Duet:
//! - A replicated text store on top of yrs, behind the `ReplicatedText` trait
//! - The bridge keeping a local buffer and the store in step
//! - Remote cursor presence anchored to the text
//! - Undo/redo restricted to local edits

pub mod anchor;
pub mod awareness;
pub mod bridge;
pub mod buffer;
pub mod codec;
pub mod document;
pub mod error;
pub mod origin;
pub mod session;
pub mod text;
pub mod undo;

pub use anchor::PositionAnchor;
pub use awareness::{AwarenessTracker, AwarenessUpdate, Color, Decoration, PeerCursor, Side};
pub use bridge::{Delta, LocalBufferBridge};
pub use buffer::{Change, EditBatch, LocalBuffer, RopeBuffer, Selection};
pub use document::Document;
pub use error::{Error, Result};
pub use origin::{ChangeOrigin, OriginId};
pub use session::{ClientSession, Outbound};
pub use text::{PositionedEdit, ReplicatedText, StoreChange, TextOp, YrsText};
pub use undo::UndoScope;
