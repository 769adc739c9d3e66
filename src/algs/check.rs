//! Consistency verification: walk the local replica state and compare views
//! pairwise across ranks, counting violations instead of failing fast.
//!
//! Diagnostics go through `log::error!` with enough context (kind, handle,
//! ranks, priorities) to locate the offending entity; the return value is the
//! violation count so drivers and tests can assert on it.

use crate::algs::StandardInterfaces;
use crate::directory::comm::Communicator;
use crate::directory::wire::WirePriorityClaim;
use crate::directory::Directory;
use crate::entity::priority::Priority;
use crate::entity::EntityKind;
use crate::grid::Multigrid;
use crate::replica_error::MeshReplicaError;
use itertools::Itertools;

const CHECK_TAG: u16 = 0xC500;

/// Local-only structural walk. Returns the number of violations found.
pub fn check_local(mg: &Multigrid, dir: &Directory) -> Result<usize, MeshReplicaError> {
    let mut violations = 0usize;

    for entity in mg.ids().collect::<Vec<_>>() {
        let e = mg.get(entity)?;

        // master uniqueness over the full replica list
        let list = dir.replica_list(mg, entity)?;
        let masters: Vec<usize> = list
            .iter()
            .filter(|r| r.priority == Priority::Master)
            .map(|r| r.rank)
            .collect();
        if masters.len() != 1 {
            log::error!(
                "{:?} {entity}: {} masters in replica list [{}]",
                e.kind,
                masters.len(),
                list.iter()
                    .map(|r| format!("{}:{}", r.rank, r.priority))
                    .join(", ")
            );
            violations += 1;
        }

        // a shared entity must be addressable by global id
        if !dir.remote_replicas(entity).is_empty() && dir.global_id(entity).is_none() {
            log::error!("{:?} {entity}: shared but has no global id", e.kind);
            violations += 1;
        }

        // corner levels must match the entity level
        for &c in &e.corners {
            let cl = mg.get(c)?.level;
            if cl != e.level {
                log::error!(
                    "{:?} {entity} at level {}: corner {c} at level {cl}",
                    e.kind,
                    e.level
                );
                violations += 1;
            }
        }

        // ghost justification
        if e.priority.is_ghost() {
            let justified = match e.kind {
                EntityKind::Element => {
                    let mut j =
                        mg.has_master_neighbor(entity)? || mg.has_master_descendant(entity)?;
                    if let Some(f) = e.father {
                        j |= mg.has_master_neighbor(f)?
                            || mg.get(f)?.priority == Priority::Master;
                    }
                    j
                }
                EntityKind::Node | EntityKind::Edge => !mg.incident_elements(entity).is_empty(),
                EntityKind::Vector => true,
            };
            if !justified {
                log::error!("{:?} {entity}: unjustified {} copy", e.kind, e.priority);
                violations += 1;
            }
        }
    }
    Ok(violations)
}

/// Full check: the local walk plus a pairwise comparison of priorities across
/// every shared entity. Each rank returns its own violation count.
pub fn check<C: Communicator>(
    mg: &Multigrid,
    dir: &Directory,
    comm: &C,
    ifaces: &StandardInterfaces,
) -> Result<usize, MeshReplicaError> {
    let mut violations = check_local(mg, dir)?;

    let claims = dir.bulk_exchange(
        ifaces.all_shared,
        mg,
        comm,
        CHECK_TAG,
        |mg, entity, gid, _dest| {
            let e = mg.get(entity).ok()?;
            Some(WirePriorityClaim::new(
                gid.get(),
                e.kind.to_wire(),
                e.priority.to_wire(),
            ))
        },
    )?;
    if claims.unmatched > 0 {
        log::error!(
            "{} priority claims arrived for entities this rank no longer holds",
            claims.unmatched
        );
        violations += claims.unmatched;
    }
    for (entity, from, rec) in claims.received {
        let e = mg.get(entity)?;
        if EntityKind::from_wire(rec.kind) != Some(e.kind) {
            log::error!(
                "{:?} {entity}: rank {from} sees kind tag {} for the same global id",
                e.kind,
                rec.kind
            );
            violations += 1;
            continue;
        }
        let claimed = Priority::from_wire(rec.prio)
            .ok_or_else(|| MeshReplicaError::comm(from, format!("bad priority {}", rec.prio)))?;
        let listed = dir
            .remote_replicas(entity)
            .iter()
            .find(|r| r.rank == from)
            .map(|r| r.priority);
        if listed != Some(claimed) {
            log::error!(
                "{:?} {entity}: rank {from} claims {claimed}, replica list says {}",
                e.kind,
                listed.map(|p| p.to_string()).unwrap_or_else(|| "nothing".into())
            );
            violations += 1;
        }
    }
    Ok(violations)
}
