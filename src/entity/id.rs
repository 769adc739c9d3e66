//! Strong, zero-cost handles for mesh entities.
//!
//! An [`EntityId`] is a per-rank arena handle; it has no meaning on any other
//! rank. A [`GlobalId`] is the opaque, stable cross-rank identity assigned by
//! the replication directory: it is identical on every replica of an entity
//! and is never reassigned. Both wrap `NonZeroU64` so 0 stays reserved as the
//! invalid/sentinel value on the wire.

use crate::replica_error::MeshReplicaError;
use std::{fmt, num::NonZeroU64};

/// Per-rank arena handle for an entity.
///
/// `repr(transparent)`: same ABI and alignment as `u64`, so handles can be
/// packed into wire records without conversion.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct EntityId(NonZeroU64);

impl EntityId {
    /// Creates an `EntityId` from a raw `u64`, rejecting 0.
    #[inline]
    pub fn new(raw: u64) -> Result<Self, MeshReplicaError> {
        NonZeroU64::new(raw)
            .map(EntityId)
            .ok_or(MeshReplicaError::InvalidEntityId)
    }

    /// Returns the inner `u64` value.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0.get()
    }

    /// Arena slot for this handle (`raw - 1`).
    #[inline]
    pub const fn index(self) -> usize {
        (self.0.get() - 1) as usize
    }

    /// Handle for an arena slot.
    #[inline]
    pub fn from_index(idx: usize) -> Self {
        // idx + 1 is always nonzero
        EntityId(NonZeroU64::new((idx as u64) + 1).unwrap())
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EntityId").field(&self.get()).finish()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// Directory-assigned stable identity shared by all replicas of an entity.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct GlobalId(NonZeroU64);

impl GlobalId {
    /// Creates a `GlobalId` from a raw `u64`, rejecting 0.
    #[inline]
    pub fn new(raw: u64) -> Result<Self, MeshReplicaError> {
        NonZeroU64::new(raw)
            .map(GlobalId)
            .ok_or(MeshReplicaError::InvalidGlobalId)
    }

    /// Returns the inner `u64` value.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GlobalId").field(&self.get()).finish()
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

#[cfg(test)]
mod layout_tests {
    //! Compile-time assertions that both handles share `u64` layout.
    use super::*;
    use static_assertions::{assert_eq_align, assert_eq_size};

    assert_eq_size!(EntityId, u64);
    assert_eq_size!(GlobalId, u64);

    #[test]
    fn alignment_matches_u64() {
        assert_eq_align!(EntityId, u64);
        assert_eq_align!(GlobalId, u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_rejected() {
        assert!(EntityId::new(0).is_err());
        assert!(GlobalId::new(0).is_err());
    }

    #[test]
    fn new_get_index_roundtrip() {
        let e = EntityId::new(7).unwrap();
        assert_eq!(e.get(), 7);
        assert_eq!(e.index(), 6);
        assert_eq!(EntityId::from_index(6), e);
    }

    #[test]
    fn debug_and_display() {
        let e = EntityId::new(3).unwrap();
        assert_eq!(format!("{e:?}"), "EntityId(3)");
        assert_eq!(format!("{e}"), "3");
        let g = GlobalId::new(9).unwrap();
        assert_eq!(format!("{g:?}"), "GlobalId(9)");
        assert_eq!(format!("{g}"), "9");
    }

    #[test]
    fn ordering_and_hash() {
        use std::collections::HashSet;
        let a = GlobalId::new(1).unwrap();
        let b = GlobalId::new(2).unwrap();
        assert!(a < b);
        let mut set = HashSet::new();
        set.insert(a);
        set.insert(b);
        assert_eq!(set.len(), 2);
    }
}
