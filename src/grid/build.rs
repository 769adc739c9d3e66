//! Small structured-mesh builders used by tests and scenario setups.
//!
//! These produce topology only: corner lists, neighbor links and the
//! father/child edges a refinement step would create. Geometry stays with the
//! external refinement-rule collaborator.

use crate::entity::id::EntityId;
use crate::entity::priority::Priority;
use crate::entity::{Entity, EntityKind, RefineClass};
use crate::grid::Multigrid;
use crate::replica_error::MeshReplicaError;

/// Handles produced by [`line_mesh`].
#[derive(Clone, Debug)]
pub struct LineMesh {
    pub nodes: Vec<EntityId>,
    pub elements: Vec<EntityId>,
}

/// Build `n` segment elements over `n + 1` nodes at level 0 and connect them.
pub fn line_mesh(mg: &mut Multigrid, n: usize) -> Result<LineMesh, MeshReplicaError> {
    let nodes: Vec<EntityId> = (0..=n)
        .map(|_| mg.insert(Entity::new(EntityKind::Node, 0)))
        .collect();
    let mut elements = Vec::with_capacity(n);
    for i in 0..n {
        let mut e = Entity::new(EntityKind::Element, 0);
        e.corners = vec![nodes[i], nodes[i + 1]];
        elements.push(mg.insert(e));
    }
    mg.connect_level(0)?;
    Ok(LineMesh { nodes, elements })
}

/// Handles produced by [`quad_strip`].
#[derive(Clone, Debug)]
pub struct QuadStrip {
    pub top: Vec<EntityId>,
    pub bottom: Vec<EntityId>,
    pub quads: Vec<EntityId>,
}

/// Build a strip of `n` quadrilaterals over two node rows at level 0 and
/// connect them. Adjacent quads share a full two-node side.
pub fn quad_strip(mg: &mut Multigrid, n: usize) -> Result<QuadStrip, MeshReplicaError> {
    let top: Vec<EntityId> = (0..=n)
        .map(|_| mg.insert(Entity::new(EntityKind::Node, 0)))
        .collect();
    let bottom: Vec<EntityId> = (0..=n)
        .map(|_| mg.insert(Entity::new(EntityKind::Node, 0)))
        .collect();
    let mut quads = Vec::with_capacity(n);
    for i in 0..n {
        let mut e = Entity::new(EntityKind::Element, 0);
        e.corners = vec![top[i], top[i + 1], bottom[i + 1], bottom[i]];
        quads.push(mg.insert(e));
    }
    mg.connect_level(0)?;
    Ok(QuadStrip { top, bottom, quads })
}

/// Mark an element for refinement in the next adaptation step. The mark is
/// consumed (cleared) by the refinement that honors it.
pub fn mark_refine(mg: &mut Multigrid, element: EntityId) -> Result<(), MeshReplicaError> {
    mg.get_mut(element)?.flags.refine_mark = true;
    Ok(())
}

/// Entities created by one segment bisection.
#[derive(Clone, Debug)]
pub struct RefinedSegment {
    /// Level `l + 1` copies of the father's corner nodes, in corner order.
    pub corner_copies: [EntityId; 2],
    /// Newly created mid-edge node.
    pub mid_node: EntityId,
    /// The two son elements.
    pub sons: [EntityId; 2],
}

/// Bisect a segment element: two corner-node copies, one mid node and two son
/// elements one level down, father links set, refine class `Red` on the
/// father. New entities are local masters until identification and priority
/// resolution say otherwise.
pub fn refine_segment(
    mg: &mut Multigrid,
    element: EntityId,
) -> Result<RefinedSegment, MeshReplicaError> {
    let (level, c0, c1) = {
        let e = mg.get(element)?;
        (e.level, e.corners[0], e.corners[1])
    };
    let son_level = level + 1;

    let copy0 = mg.insert(Entity::new(EntityKind::Node, son_level));
    let copy1 = mg.insert(Entity::new(EntityKind::Node, son_level));
    mg.link_father_child(c0, copy0)?;
    mg.link_father_child(c1, copy1)?;

    let mid = mg.insert(Entity::new(EntityKind::Node, son_level));

    let mut s0 = Entity::new(EntityKind::Element, son_level);
    s0.corners = vec![copy0, mid];
    let mut s1 = Entity::new(EntityKind::Element, son_level);
    s1.corners = vec![mid, copy1];
    let s0 = mg.insert(s0);
    let s1 = mg.insert(s1);
    mg.link_father_child(element, s0)?;
    mg.link_father_child(element, s1)?;
    mg.link_neighbors(s0, s1)?;

    let e = mg.get_mut(element)?;
    e.flags.refine_class = RefineClass::Red;
    e.flags.refine_mark = false;
    Ok(RefinedSegment {
        corner_copies: [copy0, copy1],
        mid_node: mid,
        sons: [s0, s1],
    })
}

/// Insert a ghost copy of a remote element given its corner handles.
pub fn ghost_element(
    mg: &mut Multigrid,
    level: u32,
    corners: Vec<EntityId>,
    priority: Priority,
) -> EntityId {
    let mut e = Entity::new_with_priority(EntityKind::Element, level, priority);
    e.corners = corners;
    mg.insert(e)
}
