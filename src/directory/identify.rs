//! The identify bracket: merging independently created entities into one
//! logical, globally-id'd entity.
//!
//! Between `begin_identify` and `end_identify`, ranks declare that a local
//! entity is the same logical object as whatever a named remote rank declares
//! under the same key tuple (already-identified context entities). The new
//! global id is derived on both sides as an FNV-1a hash of `(kind, keys)`, so
//! the pair agrees without a second round and a three-way share converges
//! pairwise to the same id. Key tuples are canonicalized (sorted) before
//! hashing and matching.

use crate::directory::wire::WireIdentify;
use crate::directory::{Bracket, Directory, comm::Communicator, exchange};
use crate::entity::EntityKind;
use crate::entity::id::{EntityId, GlobalId};
use crate::entity::priority::Priority;
use crate::grid::Multigrid;
use crate::replica_error::MeshReplicaError;
use std::collections::HashMap;

const IDENTIFY_TAG: u16 = 0x1D00;

/// Canonicalized identification key: entity kind plus sorted key global ids.
pub(crate) type KeyTuple = (EntityKind, Vec<u64>);

#[derive(Clone, Debug)]
struct IdentifyRequest {
    entity: EntityId,
    remote: usize,
    tuple: KeyTuple,
    level: u32,
}

/// Queued requests of one open identify bracket.
#[derive(Default)]
pub struct IdentifyState {
    requests: Vec<IdentifyRequest>,
    /// Claims received from remotes whose local counterpart does not exist
    /// yet; kept across rounds for the multi-hop case.
    pending_claims: HashMap<KeyTuple, Vec<(usize, Priority)>>,
}

/// Result of one identify round.
#[derive(Clone, Debug, Default)]
pub struct IdentifyOutcome {
    /// Entities that gained a global identity this round.
    pub identified: Vec<EntityId>,
    /// Number of requests this rank issued; feeds the convergence vote.
    pub requests_issued: usize,
}

/// Stable 64-bit FNV-1a over the canonical key tuple. The id must be equal on
/// every rank and across runs, which rules out seed-randomized hashers.
fn derive_global(kind: EntityKind, keys: &[u64]) -> GlobalId {
    const BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut h = BASIS;
    h ^= kind.to_wire() as u64;
    h = h.wrapping_mul(PRIME);
    for &k in keys {
        for b in k.to_le_bytes() {
            h ^= b as u64;
            h = h.wrapping_mul(PRIME);
        }
    }
    // 0 is the wire sentinel; remap the (vanishingly unlikely) zero hash
    GlobalId::new(if h == 0 { BASIS } else { h }).expect("nonzero by construction")
}

impl Directory {
    /// Open an identify bracket. Fails while any bracket is open.
    pub fn begin_identify(&mut self) -> Result<(), MeshReplicaError> {
        self.ensure_closed("identify")?;
        // carry pending claims from earlier rounds forward
        self.bracket = Bracket::Identify(IdentifyState {
            requests: Vec::new(),
            pending_claims: std::mem::take(&mut self.carried_claims),
        });
        Ok(())
    }

    /// Declare that `entity` is the same logical object the `remote` rank will
    /// declare under the same `keys`.
    ///
    /// Preconditions (fatal when violated): the identify lock is clear, every
    /// key is already bound to a global id, and no other local entity claimed
    /// the same key tuple.
    pub fn identify(
        &mut self,
        mg: &Multigrid,
        entity: EntityId,
        remote: usize,
        keys: &[EntityId],
    ) -> Result<(), MeshReplicaError> {
        let e = mg.get(entity)?;
        if e.flags.identify_lock {
            return Err(MeshReplicaError::AlreadyIdentified(entity));
        }
        let mut key_gids = Vec::with_capacity(keys.len());
        for &k in keys {
            key_gids.push(
                self.global_id(k)
                    .ok_or(MeshReplicaError::MissingIdentifyKey(k))?
                    .get(),
            );
        }
        key_gids.sort_unstable();
        let tuple: KeyTuple = (e.kind, key_gids);

        if let Some(&claimed) = self.key_index.get(&tuple) {
            if claimed != entity {
                return Err(ambiguity(&tuple, vec![remote]));
            }
        }
        let state = match &mut self.bracket {
            Bracket::Identify(state) => state,
            _ => return Err(MeshReplicaError::NoOpenBracket("identify")),
        };
        if let Some(prev) = state
            .requests
            .iter()
            .find(|r| r.tuple == tuple && r.entity != entity)
        {
            return Err(ambiguity(&tuple, vec![prev.remote, remote]));
        }
        state.requests.push(IdentifyRequest {
            entity,
            remote,
            tuple,
            level: e.level,
        });
        Ok(())
    }

    /// Close the bracket: derive and bind global ids, exchange claims with the
    /// declared remote ranks, and splice matching replicas into both lists.
    pub fn end_identify<C: Communicator>(
        &mut self,
        mg: &mut Multigrid,
        comm: &C,
    ) -> Result<IdentifyOutcome, MeshReplicaError> {
        let state = match std::mem::replace(&mut self.bracket, Bracket::Closed) {
            Bracket::Identify(state) => state,
            other => {
                self.bracket = other;
                return Err(MeshReplicaError::NoOpenBracket("identify"));
            }
        };
        let IdentifyState {
            requests,
            mut pending_claims,
        } = state;

        let mut outcome = IdentifyOutcome {
            requests_issued: requests.len(),
            ..IdentifyOutcome::default()
        };

        // 1) bind derived ids and index the tuples locally
        let mut outgoing: HashMap<usize, Vec<WireIdentify>> = HashMap::new();
        for req in &requests {
            let gid = derive_global(req.tuple.0, &req.tuple.1);
            self.bind_global(req.entity, gid)?;
            self.key_index.insert(req.tuple.clone(), req.entity);
            let e = mg.get_mut(req.entity)?;
            if !e.flags.identify_lock {
                e.flags.identify_lock = true;
                outcome.identified.push(req.entity);
            }
            outgoing.entry(req.remote).or_default().push(WireIdentify::new(
                req.tuple.0.to_wire(),
                e.priority.to_wire(),
                req.level,
                &req.tuple.1,
            ));
        }

        // 2) exchange claims with every declared remote
        let incoming = exchange::exchange_records(comm, IDENTIFY_TAG, &outgoing)?;

        // 3) match incoming claims against the local tuple index
        for (from, records) in incoming {
            for rec in &records {
                let kind = EntityKind::from_wire(rec.kind).ok_or_else(|| {
                    MeshReplicaError::comm(from, format!("bad entity kind {}", rec.kind))
                })?;
                let prio = Priority::from_wire(rec.prio).ok_or_else(|| {
                    MeshReplicaError::comm(from, format!("bad priority {}", rec.prio))
                })?;
                let tuple: KeyTuple = (kind, rec.keys());
                match self.key_index.get(&tuple).copied() {
                    Some(entity) => {
                        // both sides derived the same id; a different binding
                        // means the key tuple is not unique
                        let derived = derive_global(kind, &tuple.1);
                        if self.global_id(entity) != Some(derived) {
                            return Err(MeshReplicaError::GlobalIdCollision(derived));
                        }
                        self.set_replica(entity, from, prio);
                    }
                    None => {
                        // counterpart not created yet (multi-hop); keep the
                        // claim for a later round
                        pending_claims.entry(tuple).or_default().push((from, prio));
                    }
                }
            }
        }

        // 4) splice in claims from earlier rounds that match this round's work
        for req in &requests {
            if let Some(claims) = pending_claims.remove(&req.tuple) {
                for (rank, prio) in claims {
                    self.set_replica(req.entity, rank, prio);
                }
            }
        }
        self.carried_claims = pending_claims;
        Ok(outcome)
    }
}

fn ambiguity(tuple: &KeyTuple, ranks: Vec<usize>) -> MeshReplicaError {
    MeshReplicaError::AmbiguousIdentification {
        kind: tuple.0,
        keys: tuple
            .1
            .iter()
            .map(|&k| GlobalId::new(k).expect("key gids are nonzero"))
            .collect(),
        ranks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::comm::{NoComm, spawn_ranks};
    use crate::entity::Entity;
    use serial_test::serial;

    #[test]
    fn derived_ids_are_stable_and_key_sensitive() {
        let a = derive_global(EntityKind::Node, &[1, 2]);
        let b = derive_global(EntityKind::Node, &[1, 2]);
        let c = derive_global(EntityKind::Node, &[1, 3]);
        let d = derive_global(EntityKind::Edge, &[1, 2]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn identify_requires_known_keys_and_clear_lock() {
        let mut mg = Multigrid::new();
        let key = mg.insert(Entity::new(EntityKind::Node, 0));
        let new = mg.insert(Entity::new(EntityKind::Node, 1));
        let mut dir = Directory::new(0, 2);
        dir.begin_identify().unwrap();
        assert!(matches!(
            dir.identify(&mg, new, 1, &[key]),
            Err(MeshReplicaError::MissingIdentifyKey(_))
        ));
        let gid = dir.alloc_global();
        dir.bind_global(key, gid).unwrap();
        dir.identify(&mg, new, 1, &[key]).unwrap();
        let out = dir.end_identify(&mut mg, &NoComm).unwrap();
        assert_eq!(out.identified, vec![new]);
        assert!(mg.get(new).unwrap().flags.identify_lock);

        dir.begin_identify().unwrap();
        assert!(matches!(
            dir.identify(&mg, new, 1, &[key]),
            Err(MeshReplicaError::AlreadyIdentified(_))
        ));
    }

    #[test]
    fn duplicate_tuple_for_two_entities_is_ambiguous() {
        let mut mg = Multigrid::new();
        let key = mg.insert(Entity::new(EntityKind::Node, 0));
        let n1 = mg.insert(Entity::new(EntityKind::Node, 1));
        let n2 = mg.insert(Entity::new(EntityKind::Node, 1));
        let mut dir = Directory::new(0, 2);
        let gid = dir.alloc_global();
        dir.bind_global(key, gid).unwrap();
        dir.begin_identify().unwrap();
        dir.identify(&mg, n1, 1, &[key]).unwrap();
        assert!(matches!(
            dir.identify(&mg, n2, 1, &[key]),
            Err(MeshReplicaError::AmbiguousIdentification { .. })
        ));
    }

    #[test]
    fn bracket_discipline() {
        let mut dir = Directory::new(0, 2);
        dir.begin_identify().unwrap();
        assert!(matches!(
            dir.begin_identify(),
            Err(MeshReplicaError::BracketOpen { .. })
        ));
    }

    #[test]
    #[serial]
    fn two_ranks_agree_on_identity() {
        let out = spawn_ranks(2, |comm| {
            let me = comm.rank();
            let mut mg = Multigrid::new();
            let mut dir = Directory::new(me, 2);
            // the shared context node carries the same pre-agreed gid on both
            let key = mg.insert(Entity::new(EntityKind::Node, 0));
            dir.bind_global(key, GlobalId::new(77).unwrap()).unwrap();
            let new = mg.insert(Entity::new(EntityKind::Node, 1));

            dir.begin_identify().unwrap();
            dir.identify(&mg, new, 1 - me, &[key]).unwrap();
            dir.end_identify(&mut mg, &comm).unwrap();

            let gid = dir.global_id(new).unwrap().get();
            let replicas = dir.remote_replicas(new).to_vec();
            (gid, replicas)
        });
        assert_eq!(out[0].0, out[1].0, "both ranks derive the same global id");
        assert_eq!(out[0].1.len(), 1);
        assert_eq!(out[0].1[0].rank, 1);
        assert_eq!(out[1].1[0].rank, 0);
    }
}
