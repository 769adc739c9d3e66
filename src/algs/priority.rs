//! Priority resolution: after refinement or migration has disturbed the
//! copy-priority assignment, re-establish exactly one `Master` per logical
//! entity and re-justify every ghost.
//!
//! Master election is a deterministic min-rank reduction over the
//! master-eligible entries of the replica list, so every rank elects the same
//! winner without negotiation. Node and edge priorities are derived from the
//! elements incident to them; a ghost with no remaining justification is
//! reported as a prune candidate, never destroyed here.

use crate::algs::StandardInterfaces;
use crate::directory::comm::Communicator;
use crate::directory::wire::WirePriorityClaim;
use crate::directory::Directory;
use crate::entity::priority::Priority;
use crate::entity::EntityKind;
use crate::entity::id::EntityId;
use crate::grid::Multigrid;
use crate::replica_error::MeshReplicaError;

const PRIORITY_TAG: u16 = 0x5E00;

/// What one resolution pass changed at a level.
#[derive(Clone, Debug, Default)]
pub struct PriorityReport {
    /// Local copies holding `Master` after the pass.
    pub masters: usize,
    /// Local copies that lost master eligibility.
    pub demoted: usize,
    /// Ghost copies with no remaining justification. Deletion is the overlap
    /// updater's call, not ours.
    pub prune_candidates: Vec<EntityId>,
}

/// Deterministic master election: the lowest master-eligible rank wins.
/// Returns `None` when no copy in the list is eligible.
fn elect(my_rank: usize, eligible_ranks: &[usize]) -> Option<Priority> {
    let winner = eligible_ranks.iter().copied().min()?;
    Some(if winner == my_rank {
        Priority::Master
    } else {
        Priority::Border
    })
}

/// Re-resolve the copy priorities of every local entity at `level`, then push
/// the results to all replica holders so their lists agree.
pub fn resolve_priorities<C: Communicator>(
    mg: &mut Multigrid,
    dir: &mut Directory,
    comm: &C,
    ifaces: &StandardInterfaces,
    level: u32,
) -> Result<PriorityReport, MeshReplicaError> {
    let mut report = PriorityReport::default();

    // 1) elements: elect masters, re-justify ghosts
    for el in mg.ids_at(level, EntityKind::Element) {
        let prio = mg.get(el)?.priority;
        if prio.is_master_eligible() {
            let eligible = eligible_ranks(dir, mg, el)?;
            // the local copy is eligible, so the election cannot come up empty
            let resolved =
                elect(dir.rank(), &eligible).ok_or(MeshReplicaError::MasterCountViolation {
                    entity: el,
                    count: 0,
                })?;
            if resolved == Priority::Master {
                report.masters += 1;
            }
            mg.get_mut(el)?.priority = resolved;
        } else {
            let h = mg.has_master_neighbor(el)?;
            let v = ghost_vertically_needed(mg, el)?;
            match Priority::ghost_from_obligations(h, v) {
                Some(g) => mg.get_mut(el)?.priority = g,
                None => report.prune_candidates.push(el),
            }
        }
    }

    // 2) nodes and edges follow the elements incident to them
    for kind in [EntityKind::Node, EntityKind::Edge] {
        for e in mg.ids_at(level, kind) {
            let incident = incident_elements_of(mg, e)?;
            let was = mg.get(e)?.priority;
            let mut inferred: Option<Priority> = None;
            for &el in &incident {
                let p = mg.get(el)?.priority;
                inferred = Some(match inferred {
                    Some(acc) => acc.strongest(p),
                    None => p,
                });
            }
            match inferred {
                None => report.prune_candidates.push(e),
                Some(p) if p.is_master_eligible() => {
                    // a master-incident node must itself be master-eligible;
                    // elect among the eligible replicas with this copy counted
                    let mut eligible = eligible_ranks(dir, mg, e)?;
                    if !eligible.contains(&dir.rank()) {
                        eligible.push(dir.rank());
                    }
                    let resolved = elect(dir.rank(), &eligible)
                        .ok_or(MeshReplicaError::MasterCountViolation { entity: e, count: 0 })?;
                    if resolved == Priority::Master {
                        report.masters += 1;
                    }
                    mg.get_mut(e)?.priority = resolved;
                }
                Some(_) => {
                    if was.is_master_eligible() {
                        report.demoted += 1;
                    }
                    // no incident master: the copy is kept for the horizontal
                    // boundary overlap, whatever class its elements carry
                    mg.get_mut(e)?.priority = Priority::HGhost;
                }
            }
        }
    }

    // 3) tell every replica holder what this copy resolved to
    let claims = dir.bulk_exchange(
        ifaces.all_shared,
        mg,
        comm,
        PRIORITY_TAG,
        |mg, entity, gid, _dest| {
            let e = mg.get(entity).ok()?;
            if e.level != level {
                return None;
            }
            Some(WirePriorityClaim::new(
                gid.get(),
                e.kind.to_wire(),
                e.priority.to_wire(),
            ))
        },
    )?;
    for (entity, from, rec) in claims.received {
        let prio = Priority::from_wire(rec.prio)
            .ok_or_else(|| MeshReplicaError::comm(from, format!("bad priority {}", rec.prio)))?;
        dir.set_replica(entity, from, prio);
    }
    Ok(report)
}

fn eligible_ranks(
    dir: &Directory,
    mg: &Multigrid,
    entity: EntityId,
) -> Result<Vec<usize>, MeshReplicaError> {
    Ok(dir
        .replica_list(mg, entity)?
        .into_iter()
        .filter(|r| r.priority.is_master_eligible())
        .map(|r| r.rank)
        .collect())
}

/// A ghost is vertically needed when it carries a master child below it or
/// hangs under a local master father.
fn ghost_vertically_needed(mg: &Multigrid, el: EntityId) -> Result<bool, MeshReplicaError> {
    if mg.has_master_descendant(el)? {
        return Ok(true);
    }
    if let Some(f) = mg.get(el)?.father {
        if mg.get(f)?.priority == Priority::Master {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Elements whose corner set covers the entity: all incident elements for a
/// node, elements containing both endpoints for an edge.
fn incident_elements_of(
    mg: &Multigrid,
    entity: EntityId,
) -> Result<Vec<EntityId>, MeshReplicaError> {
    let e = mg.get(entity)?;
    match e.kind {
        EntityKind::Node => Ok(mg.incident_elements(entity)),
        EntityKind::Edge => {
            let corners = e.corners.clone();
            let Some(&first) = corners.first() else {
                return Ok(Vec::new());
            };
            Ok(mg
                .incident_elements(first)
                .into_iter()
                .filter(|&el| {
                    mg.get(el)
                        .map(|x| corners.iter().all(|c| x.corners.contains(c)))
                        .unwrap_or(false)
                })
                .collect())
        }
        _ => Ok(Vec::new()),
    }
}
