//! The replicated entity model: kinds, refinement classes, protocol flags and
//! the [`Entity`] record stored in the multigrid arena.
//!
//! Father/child/neighbor relations are stored as optional arena indices, never
//! raw references, so `level(child) == level(father) + 1` can be enforced at
//! link time and entities serialize trivially for the replication directory.

pub mod id;
pub mod priority;

use crate::entity::id::EntityId;
use crate::entity::priority::Priority;

/// Variant tag of a replicated entity.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[repr(u8)]
pub enum EntityKind {
    Node = 0,
    Edge = 1,
    Element = 2,
    /// Auxiliary degree-of-freedom carrier attached to the mesh.
    Vector = 3,
}

impl EntityKind {
    /// Wire encoding (one byte).
    #[inline]
    pub fn to_wire(self) -> u8 {
        self as u8
    }

    /// Decode the wire byte.
    #[inline]
    pub fn from_wire(raw: u8) -> Option<EntityKind> {
        match raw {
            0 => Some(EntityKind::Node),
            1 => Some(EntityKind::Edge),
            2 => Some(EntityKind::Element),
            3 => Some(EntityKind::Vector),
            _ => None,
        }
    }
}

/// How thoroughly an element was refined, as reported by the external
/// refinement-rule collaborator. Consumed here to decide replication need and
/// restriction targets, never to compute geometry.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(u8)]
pub enum RefineClass {
    /// Not refined.
    #[default]
    None = 0,
    /// Unchanged copy carried to the next level.
    Copy = 1,
    /// Closure-only (partial) refinement.
    Green = 2,
    /// Full refinement; restriction targets resolve to the nearest Red ancestor.
    Red = 3,
}

/// Protocol-scoped mutable flags.
///
/// The source packed these into one control word shared across unrelated
/// protocols; they are explicit fields here since the packing was a footprint
/// optimization, not a semantic requirement.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EntityFlags {
    /// Set once the entity was identified this round; prevents re-identification.
    pub identify_lock: bool,
    /// Marked as a legalization target by the partition restrictor, or as an
    /// overlap justification by the reconstructor.
    pub used_for_overlap: bool,
    /// Scheduled for refinement this step.
    pub refine_mark: bool,
    /// Refinement class reported by the rule collaborator.
    pub refine_class: RefineClass,
}

/// One entity replica as held by the local rank.
///
/// Replica lists (which other ranks hold copies, and at what priority) are
/// *not* stored here; they live in the [`Directory`](crate::directory::Directory).
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Entity {
    pub kind: EntityKind,
    /// Refinement depth; root entities sit at level 0.
    pub level: u32,
    /// Local replica classification.
    pub priority: Priority,
    pub flags: EntityFlags,
    /// Coarser entity that produced this one; `None` at level 0.
    pub father: Option<EntityId>,
    /// Finer entities produced by refining this one.
    pub children: Vec<EntityId>,
    /// Per-side geometric neighbors of the same kind; resolved lazily by the
    /// connect pass, entries may be temporarily `None`.
    pub neighbors: Vec<Option<EntityId>>,
    /// Defining corner nodes (elements and edges); empty for nodes and vectors.
    pub corners: Vec<EntityId>,
    /// Partition assignment for the next migration step.
    pub target_rank: Option<usize>,
}

impl Entity {
    /// A fresh master replica with no links.
    pub fn new(kind: EntityKind, level: u32) -> Self {
        Entity {
            kind,
            level,
            priority: Priority::Master,
            flags: EntityFlags::default(),
            father: None,
            children: Vec::new(),
            neighbors: Vec::new(),
            corners: Vec::new(),
            target_rank: None,
        }
    }

    /// Same, but arriving as a ghost copy.
    pub fn new_with_priority(kind: EntityKind, level: u32, priority: Priority) -> Self {
        Entity {
            priority,
            ..Entity::new(kind, level)
        }
    }

    /// Resolved neighbors only.
    pub fn resolved_neighbors(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.neighbors.iter().copied().flatten()
    }
}
