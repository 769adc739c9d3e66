//! Overlap reconstruction: after refinement, rebuild the one-deep ghost
//! overlap of the finer level so every master element again sees copies of
//! its remote neighborhood.
//!
//! Three passes over one coarse level. The send pass replicates the sons that
//! touch a partition boundary toward the ranks mastering the unrefined ghost
//! neighbor. The link pass resolves neighbor links among the new fine-level
//! entities. The prune pass destroys fine-level ghosts that no longer justify
//! their storage. All replication and destruction goes through transfer
//! brackets, so replica lists stay coherent as a side effect.

use crate::directory::comm::Communicator;
use crate::directory::Directory;
use crate::entity::id::EntityId;
use crate::entity::priority::Priority;
use crate::entity::{EntityKind, RefineClass};
use crate::grid::Multigrid;
use crate::replica_error::MeshReplicaError;

/// What one overlap update did at a level boundary.
#[derive(Clone, Debug, Default)]
pub struct OverlapReport {
    /// Son elements replicated outward.
    pub sent: usize,
    /// Fine-level ghost entities that arrived here.
    pub arrived: usize,
    /// Fine-level ghosts destroyed by the prune pass.
    pub pruned: usize,
}

/// Rebuild the ghost overlap of level `level + 1` from the refinement state of
/// `level`. Idempotent: a second call sends and prunes nothing.
pub fn update_overlap<C: Communicator>(
    mg: &mut Multigrid,
    dir: &mut Directory,
    comm: &C,
    level: u32,
) -> Result<OverlapReport, MeshReplicaError> {
    let mut report = OverlapReport::default();

    // --- send pass -------------------------------------------------------
    dir.begin_transfer()?;
    for el in mg.ids_at(level, EntityKind::Element) {
        let e = mg.get(el)?;
        if e.priority != Priority::Master || e.flags.refine_class != RefineClass::Red {
            continue;
        }
        let neighbors: Vec<EntityId> = e.resolved_neighbors().collect();
        for nbr in neighbors {
            let n = mg.get(nbr)?;
            if !n.priority.is_ghost() || !n.children.is_empty() {
                continue;
            }
            // corner nodes on the side shared with the unrefined ghost
            let shared: Vec<EntityId> = mg
                .get(el)?
                .corners
                .iter()
                .copied()
                .filter(|c| n.corners.contains(c))
                .collect();
            if shared.is_empty() {
                continue;
            }
            let holders: Vec<usize> = dir
                .remote_replicas(nbr)
                .iter()
                .filter(|r| r.priority.is_master_eligible())
                .map(|r| r.rank)
                .collect();
            for son in mg.get(el)?.children.clone() {
                let s = mg.get(son)?;
                if s.kind != EntityKind::Element {
                    continue;
                }
                let touches = s.corners.iter().any(|&c| {
                    mg.get(c)
                        .map(|x| x.father.map(|f| shared.contains(&f)).unwrap_or(false))
                        .unwrap_or(false)
                });
                if !touches {
                    continue;
                }
                for &holder in &holders {
                    if dir.replica_ranks(son).contains(&holder) {
                        continue;
                    }
                    dir.schedule_copy(mg, son, holder, Priority::HGhost)?;
                    for c in mg.get(son)?.corners.clone() {
                        dir.schedule_copy(mg, c, holder, Priority::HGhost)?;
                    }
                    report.sent += 1;
                }
            }
        }
    }
    let outcome = dir.end_transfer(mg, comm)?;
    report.arrived = outcome.arrived.len();

    // --- link pass -------------------------------------------------------
    mg.connect_level(level + 1)?;

    // --- prune pass ------------------------------------------------------
    dir.begin_transfer()?;
    for el in mg.ids_at(level + 1, EntityKind::Element) {
        let e = mg.get(el)?;
        if !e.priority.is_ghost() {
            continue;
        }
        let mut justified = mg.has_master_neighbor(el)? || mg.has_master_descendant(el)?;
        if let Some(father) = e.father {
            // a son ghost of an element bordering a local master stays: it is
            // the overlap the master's own refinement will link against
            justified |= mg.has_master_neighbor(father)?;
        }
        if !justified {
            log::warn!(
                "pruning unjustified {:?} ghost {el} at level {}",
                e.kind,
                e.level
            );
            dir.schedule_delete(el)?;
            report.pruned += 1;
        }
    }
    dir.end_transfer(mg, comm)?;
    crate::debug_invariants!(*mg);
    Ok(report)
}
