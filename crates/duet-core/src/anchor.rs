//! Position anchors that follow the text around them

use serde::{Deserialize, Serialize};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::StickyIndex;

use crate::codec::b64;
use crate::error::{Error, Result};

/// A location in the shared document that moves with concurrent edits.
///
/// Wraps the v1 encoding of a yrs sticky index. An anchor only means
/// something against the document instance that minted it; resolving it
/// anywhere else fails instead of producing a wrong offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionAnchor {
    #[serde(with = "b64")]
    sticky: Vec<u8>,
}

impl PositionAnchor {
    pub(crate) fn from_sticky(index: &StickyIndex) -> Self {
        Self {
            sticky: index.encode_v1(),
        }
    }

    pub(crate) fn to_sticky(&self) -> Result<StickyIndex> {
        StickyIndex::decode_v1(&self.sticky).map_err(|e| Error::AnchorResolution(e.to_string()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.sticky
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            sticky: bytes.into(),
        }
    }
}
