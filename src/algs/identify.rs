//! Identification Engine: resolve independently created entities on different
//! ranks into one logical entity, using locally known key context.
//!
//! Key selection is per kind: a corner-node copy is keyed by its father node;
//! a mid-edge or side node by the corner nodes of the coarse entity it
//! subdivides (two for an edge, four for a quadrilateral face); an edge by its
//! two endpoint keys, falling back to an endpoint's father when the endpoint
//! is itself new. Identification is only attempted toward ranks already
//! present in the replica list of the context entity, never broadcast.
//!
//! Because refinement effects can propagate more than one hop, the driver is a
//! fixed-point loop: rounds repeat while the OR-reduced "issued a new request"
//! flag is true anywhere. A stalled loop with unresolved candidates escalates
//! their context elements to full (`Red`) refinement and falls back to local
//! identity to force closure.

use crate::directory::comm::Communicator;
use crate::directory::{Directory, exchange};
use crate::entity::EntityKind;
use crate::entity::id::EntityId;
use crate::entity::RefineClass;
use crate::grid::Multigrid;
use crate::replica_error::MeshReplicaError;

const CONVERGENCE_TAG: u16 = 0x1D10;

/// What one identification phase did.
#[derive(Clone, Debug, Default)]
pub struct IdentifySummary {
    /// Rounds run until the convergence vote came back false everywhere.
    pub rounds: usize,
    /// Entities that gained a cross-rank identity.
    pub identified: usize,
    /// Unresolved candidates whose context was escalated to `Red`.
    pub escalated: usize,
}

enum KeyReadiness {
    /// Keys known on both sides; identify toward these ranks.
    Ready {
        keys: Vec<EntityId>,
        ranks: Vec<usize>,
    },
    /// No shared context: the entity is interior, identity stays local.
    Local,
    /// A key is itself still unidentified; retry next round.
    Deferred,
}

/// Identify all new nodes and edges of `level` against their remote
/// counterparts, iterating until no rank proposes a new identification.
pub fn identify_new_entities<C: Communicator>(
    mg: &mut Multigrid,
    dir: &mut Directory,
    comm: &C,
    level: u32,
) -> Result<IdentifySummary, MeshReplicaError> {
    let mut summary = IdentifySummary::default();
    loop {
        summary.rounds += 1;
        let mut candidates = mg.ids_at(level, EntityKind::Node);
        candidates.extend(mg.ids_at(level, EntityKind::Edge));
        candidates.retain(|&e| {
            dir.global_id(e).is_none()
                && mg.get(e).map(|x| !x.flags.identify_lock).unwrap_or(false)
        });

        dir.begin_identify()?;
        let mut unresolved = Vec::new();
        for cand in candidates {
            match key_context(mg, dir, cand)? {
                KeyReadiness::Ready { keys, ranks } => {
                    for r in ranks {
                        dir.identify(mg, cand, r, &keys)?;
                    }
                }
                KeyReadiness::Local => {
                    dir.ensure_global(cand)?;
                }
                KeyReadiness::Deferred => unresolved.push(cand),
            }
        }
        let outcome = dir.end_identify(mg, comm)?;
        summary.identified += outcome.identified.len();

        let progress = outcome.requests_issued > 0;
        let anyone_progressed = exchange::or_reduce_flag(comm, CONVERGENCE_TAG, progress)?;
        if anyone_progressed {
            continue;
        }
        if unresolved.is_empty() {
            break;
        }
        // no rank made progress and candidates remain: their context will
        // never materialize remotely under partial refinement, so force full
        // refinement of the context and close them out locally
        for cand in unresolved {
            escalate_context(mg, cand)?;
            dir.ensure_global(cand)?;
            summary.escalated += 1;
        }
        break;
    }

    // everything else created at this level gets a local identity so later
    // phases can address it
    for kind in [EntityKind::Element, EntityKind::Vector] {
        for e in mg.ids_at(level, kind) {
            if dir.global_id(e).is_none() {
                dir.ensure_global(e)?;
            }
        }
    }
    Ok(summary)
}

/// Per-kind key selection; see the module docs.
fn key_context(
    mg: &Multigrid,
    dir: &Directory,
    entity: EntityId,
) -> Result<KeyReadiness, MeshReplicaError> {
    let e = mg.get(entity)?;
    match e.kind {
        EntityKind::Node => match e.father {
            // corner-node copy: keyed by the father node
            Some(father) => {
                if dir.global_id(father).is_none() {
                    return Ok(KeyReadiness::Deferred);
                }
                ready_or_local(vec![father], dir.replica_ranks(father))
            }
            // mid/side node: keyed by the corners of the coarse entity whose
            // subdivision created it
            None => match subdivided_context(mg, entity)? {
                Some(context) => {
                    let keys = mg.get(context)?.corners.clone();
                    if keys.is_empty() || keys.iter().any(|&k| dir.global_id(k).is_none()) {
                        return Ok(KeyReadiness::Deferred);
                    }
                    ready_or_local(keys, dir.replica_ranks(context))
                }
                None => Ok(KeyReadiness::Local),
            },
        },
        EntityKind::Edge => {
            let mut keys = Vec::with_capacity(e.corners.len());
            for &c in &e.corners {
                if dir.global_id(c).is_some() {
                    keys.push(c);
                } else {
                    // endpoint is itself new: key by its father node instead
                    match mg.get(c)?.father {
                        Some(f) if dir.global_id(f).is_some() => keys.push(f),
                        _ => return Ok(KeyReadiness::Deferred),
                    }
                }
            }
            let ranks = match e.father {
                Some(father) => dir.replica_ranks(father),
                None => intersect_ranks(dir, &keys),
            };
            ready_or_local(keys, ranks)
        }
        EntityKind::Element | EntityKind::Vector => Ok(KeyReadiness::Local),
    }
}

fn ready_or_local(keys: Vec<EntityId>, ranks: Vec<usize>) -> Result<KeyReadiness, MeshReplicaError> {
    if ranks.is_empty() {
        Ok(KeyReadiness::Local)
    } else {
        Ok(KeyReadiness::Ready { keys, ranks })
    }
}

/// The coarse entity whose subdivision created `node`: the father of any
/// same-level son (edge preferred over element) listing `node` as a corner.
fn subdivided_context(
    mg: &Multigrid,
    node: EntityId,
) -> Result<Option<EntityId>, MeshReplicaError> {
    let level = mg.get(node)?.level;
    for kind in [EntityKind::Edge, EntityKind::Element] {
        for son in mg.ids_at(level, kind) {
            let s = mg.get(son)?;
            if s.corners.contains(&node) {
                if let Some(father) = s.father {
                    return Ok(Some(father));
                }
            }
        }
    }
    Ok(None)
}

/// Ranks holding replicas of every key (the only ranks where the counterpart
/// can exist).
fn intersect_ranks(dir: &Directory, keys: &[EntityId]) -> Vec<usize> {
    let mut iter = keys.iter();
    let Some(&first) = iter.next() else {
        return Vec::new();
    };
    let mut acc = dir.replica_ranks(first);
    for &k in iter {
        let ranks = dir.replica_ranks(k);
        acc.retain(|r| ranks.contains(r));
    }
    acc
}

/// Force full refinement on the context element of a candidate that can never
/// be matched under partial refinement.
fn escalate_context(mg: &mut Multigrid, cand: EntityId) -> Result<(), MeshReplicaError> {
    if let Some(context) = subdivided_context(mg, cand)? {
        if mg.get(context)?.kind == EntityKind::Element {
            mg.get_mut(context)?.flags.refine_class = RefineClass::Red;
        } else if let Some(grandfather) = mg.get(context)?.father {
            mg.get_mut(grandfather)?.flags.refine_class = RefineClass::Red;
        }
    }
    Ok(())
}
