//! MeshReplicaError: unified error type for mesh-replica public APIs.
//!
//! Protocol precondition violations (missing identify keys, double masters,
//! ambiguous identification) always indicate a bug in an earlier phase; the
//! driver treats them as fatal. They are still surfaced as `Err` values so
//! callers decide how to abort.

use crate::entity::id::{EntityId, GlobalId};
use crate::entity::EntityKind;
use std::fmt::Debug;
use thiserror::Error;

/// Transport-level failure carried as a boxed source inside
/// [`MeshReplicaError::CommError`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CommFailure(pub String);

/// Unified error type for mesh-replica operations.
#[derive(Debug, Error)]
pub enum MeshReplicaError {
    /// Attempted to construct an EntityId with a zero value (reserved sentinel).
    #[error("EntityId must be non-zero (0 is reserved as invalid/sentinel)")]
    InvalidEntityId,
    /// Attempted to construct a GlobalId with a zero value (reserved sentinel).
    #[error("GlobalId must be non-zero (0 is reserved as invalid/sentinel)")]
    InvalidGlobalId,
    /// A handle does not resolve to a live entity in the arena.
    #[error("entity {0} is not present in the multigrid arena")]
    UnknownEntity(EntityId),
    /// An identify key has no global id yet; the key was never identified.
    #[error("identify key {0} has no global id; keys must be mutually known before use")]
    MissingIdentifyKey(EntityId),
    /// `identify` was called on an entity whose identify lock is already set.
    #[error("entity {0} was already identified in this round (identify lock set)")]
    AlreadyIdentified(EntityId),
    /// More than one remote rank (or local request) claims the same key tuple.
    #[error("ambiguous identification of a {kind:?} by key tuple {keys:?} (claimed by ranks {ranks:?})")]
    AmbiguousIdentification {
        kind: EntityKind,
        keys: Vec<GlobalId>,
        ranks: Vec<usize>,
    },
    /// A derived global id collided with an existing binding for different keys.
    #[error("global id {0} already bound to a different entity (key-tuple collision)")]
    GlobalIdCollision(GlobalId),
    /// A global id was rebound after assignment; ids are immutable.
    #[error("entity {entity} already carries global id {existing}; cannot rebind to {requested}")]
    GlobalIdRebind {
        entity: EntityId,
        existing: GlobalId,
        requested: GlobalId,
    },
    /// Opening a collective bracket while another one is open.
    #[error("cannot open {requested} bracket: {open} bracket still open")]
    BracketOpen {
        requested: &'static str,
        open: &'static str,
    },
    /// A bracketed request was issued outside its bracket.
    #[error("{0} request issued outside an open {0} bracket")]
    NoOpenBracket(&'static str),
    /// Min-rank ownership reduction left zero or multiple master-eligible replicas.
    #[error("entity {entity} has {count} master-eligible replicas after resolution (expected exactly 1)")]
    MasterCountViolation { entity: EntityId, count: usize },
    /// Father/child link violating `level(child) == level(father) + 1`.
    #[error("father {father} (level {father_level}) cannot adopt child {child} (level {child_level})")]
    LevelMismatch {
        father: EntityId,
        father_level: u32,
        child: EntityId,
        child_level: u32,
    },
    /// An interface handle does not refer to a declared interface.
    #[error("interface handle {0} was never declared")]
    UnknownInterface(usize),
    /// Communication failure with a neighbor rank.
    #[error("communication error with rank {neighbor}: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: Box<CommFailure>,
    },
}

impl MeshReplicaError {
    /// Shorthand for a [`MeshReplicaError::CommError`] with a formatted message.
    pub fn comm(neighbor: usize, msg: impl Into<String>) -> Self {
        MeshReplicaError::CommError {
            neighbor,
            source: Box::new(CommFailure(msg.into())),
        }
    }
}
