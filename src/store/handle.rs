//! Durable object handles.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A durable handle to one stored object.
///
/// Supports equality and hashing, persists across process restarts, and
/// may be serialized as a field of other stored objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ref(u64);

impl Ref {
    pub(crate) fn from_id(id: u64) -> Self {
        Ref(id)
    }

    /// The raw object id behind this handle.
    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_compare_by_id() {
        assert_eq!(Ref::from_id(3), Ref::from_id(3));
        assert_ne!(Ref::from_id(3), Ref::from_id(4));
        assert!(Ref::from_id(3) < Ref::from_id(4));
    }

    #[test]
    fn handle_serializes_as_plain_id() {
        let bytes = bincode::serialize(&Ref::from_id(42)).unwrap();
        let back: Ref = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.id(), 42);
    }
}
