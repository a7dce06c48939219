//! Wire messages

use duet_core::{AwarenessUpdate, Delta, Outbound};
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};

/// Maximum accepted message size (16MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// A message exchanged between a client and the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Envelope", into = "Envelope")]
pub enum Message {
    /// Ask the relay for the full document
    GetDocumentRequest,
    /// Full document snapshot, relay to client only
    GetDocumentResponse { document: Vec<u8> },
    /// A delta and the session that produced it
    Update(Delta),
    /// Cursor presence of one session
    Awareness(AwarenessUpdate),
}

/// Shape on the wire. Request and response share the `"Get Document"` tag
/// and differ only by the presence of `document`.
#[derive(Serialize, Deserialize)]
#[serde(tag = "msg")]
enum Envelope {
    #[serde(rename = "Get Document")]
    GetDocument {
        #[serde(
            default,
            skip_serializing_if = "Option::is_none",
            with = "duet_core::codec::b64::option"
        )]
        document: Option<Vec<u8>>,
    },
    Update(Delta),
    Awareness(AwarenessUpdate),
}

impl From<Envelope> for Message {
    fn from(envelope: Envelope) -> Self {
        match envelope {
            Envelope::GetDocument { document: None } => Message::GetDocumentRequest,
            Envelope::GetDocument {
                document: Some(document),
            } => Message::GetDocumentResponse { document },
            Envelope::Update(delta) => Message::Update(delta),
            Envelope::Awareness(update) => Message::Awareness(update),
        }
    }
}

impl From<Message> for Envelope {
    fn from(message: Message) -> Self {
        match message {
            Message::GetDocumentRequest => Envelope::GetDocument { document: None },
            Message::GetDocumentResponse { document } => Envelope::GetDocument {
                document: Some(document),
            },
            Message::Update(delta) => Envelope::Update(delta),
            Message::Awareness(update) => Envelope::Awareness(update),
        }
    }
}

impl From<Outbound> for Message {
    fn from(outbound: Outbound) -> Self {
        match outbound {
            Outbound::Update(delta) => Message::Update(delta),
            Outbound::Awareness(update) => Message::Awareness(update),
        }
    }
}

impl Message {
    /// Parse a text frame
    pub fn decode(text: &str) -> ProtocolResult<Self> {
        Self::decode_bytes(text.as_bytes())
    }

    /// Parse a frame holding UTF-8 JSON
    pub fn decode_bytes(bytes: &[u8]) -> ProtocolResult<Self> {
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: bytes.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serialize to a text frame
    pub fn encode(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Wire name, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Message::GetDocumentRequest | Message::GetDocumentResponse { .. } => "Get Document",
            Message::Update(_) => "Update",
            Message::Awareness(_) => "Awareness",
        }
    }
}
