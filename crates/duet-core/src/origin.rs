//! Session identity and mutation origin tags

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use yrs::Origin;

/// Largest integer a JavaScript peer can hold without losing precision.
const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// Identity of one editing session.
///
/// Generated once per session and never reused. Travels on the wire as a
/// plain JSON number, so it is kept inside the range JavaScript peers can
/// represent exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OriginId(u64);

impl OriginId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        let (high, _) = Uuid::new_v4().as_u64_pair();
        Self(high & MAX_SAFE_INTEGER)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    /// Transaction origin used when this identity mutates a replica.
    pub fn origin(&self) -> Origin {
        Origin::from(self.0)
    }

    /// Recover the identity from a transaction origin produced by [`OriginId::origin`].
    pub fn from_origin(origin: &Origin) -> Option<Self> {
        let bytes: [u8; 8] = origin.as_ref().try_into().ok()?;
        Some(Self(u64::from_be_bytes(bytes)))
    }
}

impl std::fmt::Display for OriginId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for OriginId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Who produced a mutation, as seen by the replica that observed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOrigin {
    /// Produced by this session: user edits and undo/redo inverses.
    Local,
    /// Integrated from a delta sent by another session.
    Remote(OriginId),
}

impl ChangeOrigin {
    /// Classify a mutation made by `from` relative to the `local` identity.
    pub fn classify(from: OriginId, local: OriginId) -> Self {
        if from == local {
            ChangeOrigin::Local
        } else {
            ChangeOrigin::Remote(from)
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, ChangeOrigin::Local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_json_safe() {
        for _ in 0..64 {
            assert!(OriginId::generate().get() <= MAX_SAFE_INTEGER);
        }
    }

    #[test]
    fn test_origin_roundtrip() {
        let id = OriginId::new(1_700_000_000_123);
        assert_eq!(OriginId::from_origin(&id.origin()), Some(id));
    }

    #[test]
    fn test_foreign_origin_is_not_an_identity() {
        let origin = Origin::from("undo-manager");
        assert_eq!(OriginId::from_origin(&origin), None);
    }

    #[test]
    fn test_classify() {
        let local = OriginId::new(1);
        assert_eq!(ChangeOrigin::classify(local, local), ChangeOrigin::Local);
        assert_eq!(
            ChangeOrigin::classify(OriginId::new(2), local),
            ChangeOrigin::Remote(OriginId::new(2))
        );
    }
}
