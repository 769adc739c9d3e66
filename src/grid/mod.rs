//! The [`Multigrid`] aggregate root: an arena of entities plus per-level
//! [`Grid`] views and the father/child edges crossing levels.
//!
//! All structural relations are arena indices. Linking a child to a father
//! checks `level(child) == level(father) + 1`, so the hierarchy invariant
//! holds structurally instead of by convention.

pub mod build;

use crate::entity::id::EntityId;
use crate::entity::priority::Priority;
use crate::entity::{Entity, EntityKind, RefineClass};
use crate::replica_error::MeshReplicaError;
use hashbrown::HashMap;

/// Ordered view of the entities living at one refinement level.
#[derive(Clone, Debug, Default)]
pub struct Grid {
    pub level: u32,
    entities: Vec<EntityId>,
}

impl Grid {
    /// All entities at this level, in insertion order.
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }
}

/// Arena of all local entity replicas across every refinement level.
#[derive(Clone, Debug, Default)]
pub struct Multigrid {
    arena: Vec<Option<Entity>>,
    levels: Vec<Grid>,
}

impl Multigrid {
    pub fn new() -> Self {
        Multigrid::default()
    }

    /// Number of populated levels.
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// The grid view for `level`, if any entity lives there.
    pub fn grid(&self, level: u32) -> Option<&Grid> {
        self.levels.get(level as usize)
    }

    /// Insert an entity, returning its handle.
    pub fn insert(&mut self, entity: Entity) -> EntityId {
        let level = entity.level as usize;
        while self.levels.len() <= level {
            let l = self.levels.len() as u32;
            self.levels.push(Grid {
                level: l,
                entities: Vec::new(),
            });
        }
        self.arena.push(Some(entity));
        let id = EntityId::from_index(self.arena.len() - 1);
        self.levels[level].entities.push(id);
        id
    }

    /// Remove an entity from the arena and its level view.
    ///
    /// Links pointing *at* the removed entity are cleared; the caller is
    /// responsible for not removing entities that are pending identification
    /// keys or part of an open transfer.
    pub fn remove(&mut self, id: EntityId) -> Result<Entity, MeshReplicaError> {
        let slot = self
            .arena
            .get_mut(id.index())
            .ok_or(MeshReplicaError::UnknownEntity(id))?;
        let entity = slot.take().ok_or(MeshReplicaError::UnknownEntity(id))?;
        if let Some(grid) = self.levels.get_mut(entity.level as usize) {
            grid.entities.retain(|&e| e != id);
        }
        for slot in self.arena.iter_mut().flatten() {
            if slot.father == Some(id) {
                slot.father = None;
            }
            slot.children.retain(|&c| c != id);
            for n in slot.neighbors.iter_mut() {
                if *n == Some(id) {
                    *n = None;
                }
            }
        }
        Ok(entity)
    }

    /// True while `id` resolves to a live entity.
    pub fn contains(&self, id: EntityId) -> bool {
        matches!(self.arena.get(id.index()), Some(Some(_)))
    }

    pub fn get(&self, id: EntityId) -> Result<&Entity, MeshReplicaError> {
        self.arena
            .get(id.index())
            .and_then(|slot| slot.as_ref())
            .ok_or(MeshReplicaError::UnknownEntity(id))
    }

    pub fn get_mut(&mut self, id: EntityId) -> Result<&mut Entity, MeshReplicaError> {
        self.arena
            .get_mut(id.index())
            .and_then(|slot| slot.as_mut())
            .ok_or(MeshReplicaError::UnknownEntity(id))
    }

    /// All live entity handles.
    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.arena.iter().enumerate().filter_map(|(idx, slot)| {
            slot.as_ref().map(|_| EntityId::from_index(idx))
        })
    }

    /// Handles of `kind` at `level`.
    pub fn ids_at(&self, level: u32, kind: EntityKind) -> Vec<EntityId> {
        match self.grid(level) {
            Some(grid) => grid
                .entities
                .iter()
                .copied()
                .filter(|&id| self.get(id).map(|e| e.kind == kind).unwrap_or(false))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Link `child` under `father`, enforcing the one-level-down invariant.
    pub fn link_father_child(
        &mut self,
        father: EntityId,
        child: EntityId,
    ) -> Result<(), MeshReplicaError> {
        let father_level = self.get(father)?.level;
        let child_level = self.get(child)?.level;
        if child_level != father_level + 1 {
            return Err(MeshReplicaError::LevelMismatch {
                father,
                father_level,
                child,
                child_level,
            });
        }
        {
            let f = self.get_mut(father)?;
            if !f.children.contains(&child) {
                f.children.push(child);
            }
        }
        self.get_mut(child)?.father = Some(father);
        Ok(())
    }

    /// Symmetric neighbor link between two same-level entities.
    pub fn link_neighbors(&mut self, a: EntityId, b: EntityId) -> Result<(), MeshReplicaError> {
        self.push_neighbor(a, b)?;
        self.push_neighbor(b, a)
    }

    fn push_neighbor(&mut self, of: EntityId, nbr: EntityId) -> Result<(), MeshReplicaError> {
        let e = self.get_mut(of)?;
        if !e.neighbors.contains(&Some(nbr)) {
            e.neighbors.push(Some(nbr));
        }
        Ok(())
    }

    /// Walk up the father chain to the nearest ancestor with full (`Red`)
    /// refinement class, including `id` itself.
    pub fn nearest_red_ancestor(&self, id: EntityId) -> Result<Option<EntityId>, MeshReplicaError> {
        let mut cur = Some(id);
        while let Some(e) = cur {
            let ent = self.get(e)?;
            if ent.flags.refine_class == RefineClass::Red {
                return Ok(Some(e));
            }
            cur = ent.father;
        }
        Ok(None)
    }

    /// Transitive children of `id` (not including `id`).
    pub fn descendants(&self, id: EntityId) -> Result<Vec<EntityId>, MeshReplicaError> {
        let mut out = Vec::new();
        let mut stack = self.get(id)?.children.clone();
        while let Some(c) = stack.pop() {
            stack.extend(self.get(c)?.children.iter().copied());
            out.push(c);
        }
        Ok(out)
    }

    /// True when the entity has at least one local master among its same-level
    /// resolved neighbors.
    pub fn has_master_neighbor(&self, id: EntityId) -> Result<bool, MeshReplicaError> {
        let e = self.get(id)?;
        for n in e.resolved_neighbors() {
            if self.get(n)?.priority == Priority::Master {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// True when some descendant of the entity is a local master.
    pub fn has_master_descendant(&self, id: EntityId) -> Result<bool, MeshReplicaError> {
        for d in self.descendants(id)? {
            if self.get(d)?.priority == Priority::Master {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Local elements of `level` whose corner list contains `node`.
    pub fn incident_elements(&self, node: EntityId) -> Vec<EntityId> {
        self.ids()
            .filter(|&id| {
                self.get(id)
                    .map(|e| e.kind == EntityKind::Element && e.corners.contains(&node))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Lazy neighbor resolution for the elements of one level.
    ///
    /// Two same-level elements become neighbors when they expose the same
    /// side: a shared corner for segments, a shared adjacent corner pair of
    /// the cyclic corner list otherwise. Corners shared without a common side
    /// (two quads meeting diagonally) do not link. Already-linked pairs are
    /// left untouched, so the pass is idempotent.
    pub fn connect_level(&mut self, level: u32) -> Result<(), MeshReplicaError> {
        let elements = self.ids_at(level, EntityKind::Element);
        // side key -> elements exposing that side
        let mut by_side: HashMap<(EntityId, EntityId), Vec<EntityId>> = HashMap::new();
        for &el in &elements {
            for side in self.sides_of(el)? {
                let owners = by_side.entry(side).or_default();
                if !owners.contains(&el) {
                    owners.push(el);
                }
            }
        }
        let mut links: Vec<(EntityId, EntityId)> = Vec::new();
        for owners in by_side.values() {
            for (i, &a) in owners.iter().enumerate() {
                for &b in &owners[i + 1..] {
                    links.push((a, b));
                }
            }
        }
        for (a, b) in links {
            self.link_neighbors(a, b)?;
        }
        Ok(())
    }

    /// Sides of an element as sorted corner pairs: each corner alone
    /// (doubled) for a segment, consecutive pairs of the cyclic corner list
    /// otherwise.
    fn sides_of(&self, el: EntityId) -> Result<Vec<(EntityId, EntityId)>, MeshReplicaError> {
        let corners = &self.get(el)?.corners;
        Ok(match corners.len() {
            0 | 1 => Vec::new(),
            2 => corners.iter().map(|&c| (c, c)).collect(),
            n => (0..n)
                .map(|i| {
                    let (a, b) = (corners[i], corners[(i + 1) % n]);
                    if a <= b { (a, b) } else { (b, a) }
                })
                .collect(),
        })
    }
}
