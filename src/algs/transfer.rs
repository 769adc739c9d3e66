//! Migration: move master elements to their restricted target ranks in one
//! transfer transaction, rebuilding the one-deep ghost overlap around the
//! moved copies and disposing of the copies left behind.
//!
//! The coordinator assumes the assignment was legalized by
//! [`restrict_partitioning`](crate::algs::restrict::restrict_partitioning)
//! first. A move ships the element with its corner nodes, horizontal ghosts of
//! it to the future ranks of its neighbors (and of them to the destination),
//! and a vertical ghost of its father when the father stays elsewhere. The
//! copy left behind is downgraded to a ghost while a local master still
//! justifies it, otherwise it is deleted in the same transaction.

use crate::algs::priority::resolve_priorities;
use crate::algs::restrict::effective_target;
use crate::algs::StandardInterfaces;
use crate::directory::comm::Communicator;
use crate::directory::wire::WireTargetMark;
use crate::directory::Directory;
use crate::entity::id::EntityId;
use crate::entity::priority::Priority;
use crate::entity::EntityKind;
use crate::grid::Multigrid;
use crate::replica_error::MeshReplicaError;

const MIGRATE_TARGET_TAG: u16 = 0x6A00;

/// Move every local master element of `level` whose target differs from this
/// rank. Returns the number of masters that left.
pub fn migrate_level<C: Communicator>(
    mg: &mut Multigrid,
    dir: &mut Directory,
    comm: &C,
    ifaces: &StandardInterfaces,
    level: u32,
) -> Result<usize, MeshReplicaError> {
    // 1) ghost holders learn where the master is headed
    let targets = dir.bulk_exchange(
        ifaces.element_down,
        mg,
        comm,
        MIGRATE_TARGET_TAG,
        |mg, entity, gid, _dest| {
            let e = mg.get(entity).ok()?;
            if e.level != level || !e.priority.is_master_eligible() {
                return None;
            }
            let t = e.target_rank?;
            Some(WireTargetMark::new(gid.get(), t, false))
        },
    )?;
    for (entity, _from, rec) in targets.received {
        mg.get_mut(entity)?.target_rank = Some(rec.target());
    }

    // 2) retention vote for ghosts whose master moves elsewhere
    let mut dropped_ghosts: Vec<EntityId> = Vec::new();
    for el in mg.ids_at(level, EntityKind::Element) {
        let e = mg.get(el)?;
        if e.priority.is_master_eligible() {
            continue;
        }
        let Some(target) = e.target_rank else {
            continue;
        };
        if target == dir.rank() {
            // the master record arrives here and overwrites the ghost
            continue;
        }
        if !mg.has_master_neighbor(el)? && !mg.has_master_descendant(el)? {
            dropped_ghosts.push(el);
        }
    }

    // 3) the move transaction
    let movers: Vec<(EntityId, usize)> = mg
        .ids_at(level, EntityKind::Element)
        .into_iter()
        .filter_map(|el| {
            let e = mg.get(el).ok()?;
            if !e.priority.is_master_eligible() {
                return None;
            }
            match e.target_rank {
                Some(t) if t != dir.rank() => Some((el, t)),
                _ => None,
            }
        })
        .collect();

    dir.begin_transfer()?;
    let mut deleted_elements: Vec<EntityId> = dropped_ghosts.clone();
    for &g in &dropped_ghosts {
        dir.schedule_delete(g)?;
    }
    for &(el, t) in &movers {
        dir.schedule_copy(mg, el, t, Priority::Master)?;
        for c in mg.get(el)?.corners.clone() {
            dir.schedule_copy(mg, c, t, Priority::Border)?;
        }

        // vertical ghost of the father at the destination
        if let Some(father) = mg.get(el)?.father {
            if effective_target(mg, dir, father)? != t {
                dir.schedule_copy(mg, father, t, Priority::VGhost)?;
                for c in mg.get(father)?.corners.clone() {
                    dir.schedule_copy(mg, c, t, Priority::HGhost)?;
                }
            }
        }

        // horizontal overlap around the moved copy
        let neighbors: Vec<EntityId> = mg.get(el)?.resolved_neighbors().collect();
        for n in neighbors {
            let nr = effective_target(mg, dir, n)?;
            if nr != t {
                // the destination needs a ghost of the staying neighbor
                dir.schedule_copy(mg, n, t, Priority::HGhost)?;
                for c in mg.get(n)?.corners.clone() {
                    dir.schedule_copy(mg, c, t, Priority::HGhost)?;
                }
                if nr != dir.rank() {
                    // and the neighbor's rank needs a ghost of the mover
                    dir.schedule_copy(mg, el, nr, Priority::HGhost)?;
                    for c in mg.get(el)?.corners.clone() {
                        dir.schedule_copy(mg, c, nr, Priority::HGhost)?;
                    }
                }
            }
        }

        // dispose of the copy left behind: downgrade while justified, delete
        // otherwise
        let mut h = false;
        for n in mg.get(el)?.resolved_neighbors().collect::<Vec<_>>() {
            if mg.get(n)?.priority == Priority::Master && effective_target(mg, dir, n)? == dir.rank()
            {
                h = true;
            }
        }
        let mut v = mg.has_master_descendant(el)?;
        if let Some(f) = mg.get(el)?.father {
            v |= mg.get(f)?.priority == Priority::Master;
        }
        match Priority::ghost_from_obligations(h, v) {
            Some(g) => mg.get_mut(el)?.priority = g,
            None => {
                dir.schedule_delete(el)?;
                deleted_elements.push(el);
            }
        }
    }

    // orphaned nodes: every incident element is leaving
    let mut orphan_check: Vec<EntityId> = Vec::new();
    for &(el, _) in &movers {
        orphan_check.extend(mg.get(el)?.corners.iter().copied());
    }
    for &g in &dropped_ghosts {
        orphan_check.extend(mg.get(g)?.corners.iter().copied());
    }
    orphan_check.sort_unstable();
    orphan_check.dedup();
    for node in orphan_check {
        let incident = mg.incident_elements(node);
        if !incident.is_empty() && incident.iter().all(|e| deleted_elements.contains(e)) {
            dir.schedule_delete(node)?;
        }
    }

    dir.end_transfer(mg, comm)?;
    // arrivals carry corners but no neighbor links yet
    mg.connect_level(level)?;

    // two resolution passes: the first settles local demotions and pushes the
    // new priorities out, the second elects with the refreshed replica lists
    resolve_priorities(mg, dir, comm, ifaces, level)?;
    resolve_priorities(mg, dir, comm, ifaces, level)?;
    crate::debug_invariants!(*mg);
    Ok(movers.len())
}
