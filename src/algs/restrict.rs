//! Partition-assignment restriction: legalize the load balancer's raw
//! element-to-rank assignment so refinement trees migrate as a unit.
//!
//! An element's *effective* target is its assigned target rank, defaulting to
//! wherever its master lives. Restriction forces every descendant of a fully
//! (`Red`) refined element onto the target of its nearest `Red` ancestor, in
//! two sweeps: a bottom-up sweep marks ancestors whose subtree disagrees
//! (ghost holders push their marks to the master copy), then a top-down sweep
//! broadcasts the anchor target to ghost copies and overwrites descendant
//! targets locally. The pass is idempotent; the return value says whether a
//! second pass would still change anything.

use crate::algs::StandardInterfaces;
use crate::directory::comm::Communicator;
use crate::directory::exchange;
use crate::directory::wire::WireTargetMark;
use crate::directory::Directory;
use crate::entity::EntityKind;
use crate::entity::id::EntityId;
use crate::grid::Multigrid;
use crate::replica_error::MeshReplicaError;

const RESTRICT_UP_TAG: u16 = 0x4E00;
const RESTRICT_DOWN_TAG: u16 = 0x4E02;
const RESTRICT_LEVELS_TAG: u16 = 0x4E04;

/// Assigned target of an element, defaulting to the rank of its master copy.
pub fn effective_target(
    mg: &Multigrid,
    dir: &Directory,
    el: EntityId,
) -> Result<usize, MeshReplicaError> {
    if let Some(t) = mg.get(el)?.target_rank {
        return Ok(t);
    }
    let fallback = dir
        .replica_list(mg, el)?
        .into_iter()
        .filter(|r| r.priority.is_master_eligible())
        .map(|r| r.rank)
        .min()
        .unwrap_or(dir.rank());
    Ok(fallback)
}

/// Run one restriction pass over all levels. Returns `true` when any target
/// was corrected, i.e. the assignment was not yet legal.
pub fn restrict_partitioning<C: Communicator>(
    mg: &mut Multigrid,
    dir: &mut Directory,
    comm: &C,
    ifaces: &StandardInterfaces,
) -> Result<bool, MeshReplicaError> {
    for id in mg.ids().collect::<Vec<_>>() {
        mg.get_mut(id)?.flags.used_for_overlap = false;
    }
    // every rank must walk the same depth or the per-level exchanges desync
    let nlevels = exchange::max_reduce_u32(comm, RESTRICT_LEVELS_TAG, mg.level_count() as u32)?;
    let mut corrections = 0usize;

    // bottom-up: find subtrees whose assignment disagrees with their anchor
    for level in (1..nlevels).rev() {
        for el in mg.ids_at(level, EntityKind::Element) {
            if !mg.get(el)?.priority.is_master_eligible() {
                continue;
            }
            let Some(father) = mg.get(el)?.father else {
                continue;
            };
            let Some(anchor) = mg.nearest_red_ancestor(father)? else {
                continue;
            };
            if effective_target(mg, dir, el)? != effective_target(mg, dir, anchor)? {
                mg.get_mut(anchor)?.flags.used_for_overlap = true;
            }
        }
        // ghost holders report their marks to the master copy of the anchor
        let up = dir.bulk_exchange(
            ifaces.element_up,
            mg,
            comm,
            RESTRICT_UP_TAG,
            |mg, entity, gid, _dest| {
                let e = mg.get(entity).ok()?;
                if !e.flags.used_for_overlap {
                    return None;
                }
                Some(WireTargetMark::new(
                    gid.get(),
                    e.target_rank.unwrap_or(0),
                    true,
                ))
            },
        )?;
        for (entity, _from, rec) in up.received {
            if rec.used() {
                mg.get_mut(entity)?.flags.used_for_overlap = true;
            }
        }
    }

    // top-down: marked anchors broadcast their target and overwrite their
    // subtrees; unmarked masters have nothing to correct and stay silent
    for level in 0..nlevels {
        let down = dir.bulk_exchange(
            ifaces.element_down,
            mg,
            comm,
            RESTRICT_DOWN_TAG,
            |mg, entity, gid, _dest| {
                let e = mg.get(entity).ok()?;
                if e.level != level || !e.flags.used_for_overlap {
                    return None;
                }
                let target = e.target_rank.unwrap_or(dir.rank());
                Some(WireTargetMark::new(gid.get(), target, true))
            },
        )?;
        for (entity, _from, rec) in down.received {
            let e = mg.get_mut(entity)?;
            if e.target_rank != Some(rec.target()) {
                e.target_rank = Some(rec.target());
                corrections += 1;
            }
            e.flags.used_for_overlap |= rec.used();
        }

        for el in mg.ids_at(level, EntityKind::Element) {
            if !mg.get(el)?.flags.used_for_overlap {
                continue;
            }
            let target = effective_target(mg, dir, el)?;
            for child in mg.get(el)?.children.clone() {
                if mg.get(child)?.kind != EntityKind::Element {
                    continue;
                }
                let c = mg.get_mut(child)?;
                if c.target_rank != Some(target) {
                    c.target_rank = Some(target);
                    corrections += 1;
                }
                c.flags.used_for_overlap = true;
            }
        }
    }
    Ok(corrections > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::declare_standard_interfaces;
    use crate::directory::comm::{spawn_ranks, NoComm};
    use crate::entity::id::GlobalId;
    use crate::entity::priority::Priority;
    use crate::entity::Entity;
    use crate::grid::build;
    use serial_test::serial;

    #[test]
    fn subtree_follows_its_red_anchor() {
        let mut mg = Multigrid::new();
        let mesh = build::line_mesh(&mut mg, 2).unwrap();
        let r = build::refine_segment(&mut mg, mesh.elements[0]).unwrap();
        let mut dir = Directory::new(0, 2);
        let ifaces = declare_standard_interfaces(&mut dir);
        for id in mg.ids().collect::<Vec<_>>() {
            dir.ensure_global(id).unwrap();
        }
        // the balancer moves the coarse element but not its sons
        mg.get_mut(mesh.elements[0]).unwrap().target_rank = Some(1);
        let changed = restrict_partitioning(&mut mg, &mut dir, &NoComm, &ifaces).unwrap();
        assert!(changed);
        for &son in &r.sons {
            assert_eq!(mg.get(son).unwrap().target_rank, Some(1));
        }
        // untouched subtree stays put
        assert_eq!(mg.get(mesh.elements[1]).unwrap().target_rank, None);
        // second pass finds nothing to correct
        assert!(!restrict_partitioning(&mut mg, &mut dir, &NoComm, &ifaces).unwrap());
    }

    #[test]
    #[serial]
    fn legal_assignment_is_a_fixed_point_on_first_sight() {
        // rank 0 masters a Red element, rank 1 holds a vertical ghost of it
        // with a master son already assigned to the anchor's rank; nothing is
        // illegal, so the very first pass must report no corrections and the
        // ghost copy's target must stay untouched
        let out = spawn_ranks(2, |comm| {
            let me = comm.rank();
            let mut mg = Multigrid::new();
            let mut dir = Directory::new(me, 2);
            let ifaces = declare_standard_interfaces(&mut dir);
            let gid = GlobalId::new(700).unwrap();
            if me == 0 {
                let el = build::ghost_element(&mut mg, 0, vec![], Priority::Master);
                mg.get_mut(el).unwrap().flags.refine_class =
                    crate::entity::RefineClass::Red;
                mg.get_mut(el).unwrap().target_rank = Some(0);
                dir.bind_global(el, gid).unwrap();
                dir.set_replica(el, 1, Priority::VGhost);
                let changed = restrict_partitioning(&mut mg, &mut dir, &comm, &ifaces).unwrap();
                (changed, mg.get(el).unwrap().target_rank)
            } else {
                let father = build::ghost_element(&mut mg, 0, vec![], Priority::VGhost);
                mg.get_mut(father).unwrap().flags.refine_class =
                    crate::entity::RefineClass::Red;
                let son = build::ghost_element(&mut mg, 1, vec![], Priority::Master);
                mg.get_mut(son).unwrap().target_rank = Some(0);
                mg.link_father_child(father, son).unwrap();
                dir.bind_global(father, gid).unwrap();
                dir.set_replica(father, 0, Priority::Master);
                let changed = restrict_partitioning(&mut mg, &mut dir, &comm, &ifaces).unwrap();
                (changed, mg.get(father).unwrap().target_rank)
            }
        });
        assert!(!out[0].0);
        assert!(!out[1].0);
        // the unmarked anchor broadcast nothing
        assert_eq!(out[1].1, None);
    }

    #[test]
    #[serial]
    fn ghost_holder_learns_the_anchor_target() {
        // rank 0 masters a Red coarse element; rank 1 holds a vertical ghost
        // of it plus a master son assigned elsewhere. Restriction must pull
        // the son onto the anchor's target.
        let out = spawn_ranks(2, |comm| {
            let me = comm.rank();
            let mut mg = Multigrid::new();
            let mut dir = Directory::new(me, 2);
            let ifaces = declare_standard_interfaces(&mut dir);
            let gid = GlobalId::new(700).unwrap();
            if me == 0 {
                let n = mg.insert(Entity::new(EntityKind::Node, 0));
                let m = mg.insert(Entity::new(EntityKind::Node, 0));
                let el = build::ghost_element(&mut mg, 0, vec![n, m], Priority::Master);
                mg.get_mut(el).unwrap().flags.refine_class =
                    crate::entity::RefineClass::Red;
                mg.get_mut(el).unwrap().target_rank = Some(0);
                dir.bind_global(el, gid).unwrap();
                dir.set_replica(el, 1, Priority::VGhost);
                for id in mg.ids().collect::<Vec<_>>() {
                    dir.ensure_global(id).unwrap();
                }
                let changed = restrict_partitioning(&mut mg, &mut dir, &comm, &ifaces).unwrap();
                (changed, mg.get(el).unwrap().target_rank)
            } else {
                let n = mg.insert(Entity::new(EntityKind::Node, 1));
                let m = mg.insert(Entity::new(EntityKind::Node, 1));
                let father = build::ghost_element(&mut mg, 0, vec![], Priority::VGhost);
                mg.get_mut(father).unwrap().flags.refine_class =
                    crate::entity::RefineClass::Red;
                let son = build::ghost_element(&mut mg, 1, vec![n, m], Priority::Master);
                mg.link_father_child(father, son).unwrap();
                dir.bind_global(father, gid).unwrap();
                dir.set_replica(father, 0, Priority::Master);
                for id in mg.ids().collect::<Vec<_>>() {
                    dir.ensure_global(id).unwrap();
                }
                let changed = restrict_partitioning(&mut mg, &mut dir, &comm, &ifaces).unwrap();
                (changed, mg.get(son).unwrap().target_rank)
            }
        });
        // rank 1's son ends up assigned to the anchor's target, rank 0
        assert!(out[1].0);
        assert_eq!(out[1].1, Some(0));
    }
}
