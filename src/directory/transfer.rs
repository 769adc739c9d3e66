//! The transfer bracket: transactional relocation, replication and deletion
//! of entities.
//!
//! Between `begin_transfer` and `end_transfer`, ranks queue create-or-move
//! copies and deletions. The commit serializes full entity records toward
//! every destination, mirrors replica-list updates to every rank holding a
//! copy, applies arrivals in dependency order (nodes before elements, coarse
//! before fine) and finally performs the local deletions. There is no partial
//! commit: an error mid-apply is returned to the driver, which must treat the
//! step as fatal.

use crate::directory::wire::{WireEntity, WireKeyed, WireReplicaUpdate};
use crate::directory::{Bracket, Directory, comm::Communicator, exchange};
use crate::entity::id::{EntityId, GlobalId};
use crate::entity::priority::Priority;
use crate::entity::{Entity, EntityKind};
use crate::grid::Multigrid;
use crate::replica_error::MeshReplicaError;
use std::collections::HashMap;

const TRANSFER_ENTITY_TAG: u16 = 0x7F00;
const TRANSFER_UPDATE_TAG: u16 = 0x7F02;

#[derive(Clone, Debug)]
struct CopyRequest {
    entity: EntityId,
    dest: usize,
    priority: Priority,
}

/// Queued requests of one open transfer bracket.
#[derive(Default)]
pub struct TransferState {
    copies: Vec<CopyRequest>,
    deletes: Vec<EntityId>,
}

/// What a commit did locally.
#[derive(Clone, Debug, Default)]
pub struct TransferOutcome {
    /// Entities materialized here by the commit.
    pub arrived: Vec<EntityId>,
    /// Pre-existing entities whose priority was rewritten by an incoming copy.
    pub updated: Vec<EntityId>,
    /// Local entities destroyed by the commit.
    pub deleted: usize,
}

impl Directory {
    /// Open a transfer bracket. Fails while any bracket is open.
    pub fn begin_transfer(&mut self) -> Result<(), MeshReplicaError> {
        self.ensure_closed("transfer")?;
        self.bracket = Bracket::Transfer(TransferState::default());
        Ok(())
    }

    /// Queue a create-or-move of `entity` toward `dest` at `priority`.
    ///
    /// Scheduling the same `(entity, dest)` twice merges to the strongest
    /// priority. Corners and fathers referenced by the record must be
    /// scheduled by the caller if the destination needs them resolvable.
    pub fn schedule_copy(
        &mut self,
        mg: &Multigrid,
        entity: EntityId,
        dest: usize,
        priority: Priority,
    ) -> Result<(), MeshReplicaError> {
        if !mg.contains(entity) {
            return Err(MeshReplicaError::UnknownEntity(entity));
        }
        self.ensure_global(entity)?;
        let state = match &mut self.bracket {
            Bracket::Transfer(state) => state,
            _ => return Err(MeshReplicaError::NoOpenBracket("transfer")),
        };
        debug_assert_ne!(dest, self.rank, "copy toward the local rank is a no-op");
        match state
            .copies
            .iter_mut()
            .find(|c| c.entity == entity && c.dest == dest)
        {
            Some(existing) => existing.priority = existing.priority.strongest(priority),
            None => state.copies.push(CopyRequest {
                entity,
                dest,
                priority,
            }),
        }
        Ok(())
    }

    /// Queue the local destruction of `entity` at commit time.
    pub fn schedule_delete(&mut self, entity: EntityId) -> Result<(), MeshReplicaError> {
        let state = match &mut self.bracket {
            Bracket::Transfer(state) => state,
            _ => return Err(MeshReplicaError::NoOpenBracket("transfer")),
        };
        if !state.deletes.contains(&entity) {
            state.deletes.push(entity);
        }
        Ok(())
    }

    /// Commit: exchange entity records and replica updates, materialize
    /// arrivals, apply list updates, perform deletions.
    pub fn end_transfer<C: Communicator>(
        &mut self,
        mg: &mut Multigrid,
        comm: &C,
    ) -> Result<TransferOutcome, MeshReplicaError> {
        let state = match std::mem::replace(&mut self.bracket, Bracket::Closed) {
            Bracket::Transfer(state) => state,
            other => {
                self.bracket = other;
                return Err(MeshReplicaError::NoOpenBracket("transfer"));
            }
        };
        let TransferState { copies, deletes } = state;

        // 1) serialize copies per destination
        let mut entity_out: HashMap<usize, Vec<WireEntity>> = HashMap::new();
        let mut update_out: HashMap<usize, Vec<WireReplicaUpdate>> = HashMap::new();
        for req in &copies {
            let e = mg.get(req.entity)?;
            let gid = self
                .global_id(req.entity)
                .expect("schedule_copy bound a global id");
            let father_gid = e
                .father
                .and_then(|f| self.global_id(f))
                .map(|g| g.get())
                .unwrap_or(0);
            let mut corner_gids = Vec::with_capacity(e.corners.len());
            for &c in &e.corners {
                corner_gids.push(self.ensure_global(c)?.get());
            }
            entity_out.entry(req.dest).or_default().push(WireEntity::new(
                gid.get(),
                father_gid,
                e.kind.to_wire(),
                req.priority.to_wire(),
                e.level,
                &corner_gids,
            ));

            // replica bookkeeping: tell current holders about the new copy,
            // and tell the destination who already holds one
            let holders = self.replica_ranks(req.entity);
            for &r in &holders {
                if r != req.dest {
                    update_out
                        .entry(r)
                        .or_default()
                        .push(WireReplicaUpdate::set(gid.get(), req.dest, req.priority.to_wire()));
                }
            }
            for rep in self.remote_replicas(req.entity) {
                if rep.rank != req.dest {
                    update_out.entry(req.dest).or_default().push(WireReplicaUpdate::set(
                        gid.get(),
                        rep.rank,
                        rep.priority.to_wire(),
                    ));
                }
            }
            if !deletes.contains(&req.entity) {
                update_out.entry(req.dest).or_default().push(WireReplicaUpdate::set(
                    gid.get(),
                    self.rank(),
                    e.priority.to_wire(),
                ));
            }
        }
        for &entity in &deletes {
            if let Some(gid) = self.global_id(entity) {
                for r in self.replica_ranks(entity) {
                    update_out
                        .entry(r)
                        .or_default()
                        .push(WireReplicaUpdate::remove(gid.get(), self.rank()));
                }
            }
        }

        // 2) the two symmetric exchanges
        let entity_in = exchange::exchange_records(comm, TRANSFER_ENTITY_TAG, &entity_out)?;
        let update_in = exchange::exchange_records(comm, TRANSFER_UPDATE_TAG, &update_out)?;

        // record the copies we pushed out
        for req in &copies {
            self.set_replica(req.entity, req.dest, req.priority);
        }

        // 3) materialize arrivals: nodes before elements, coarse before fine,
        //    so fathers and corners resolve on first sight
        let mut arrivals: Vec<(usize, WireEntity)> = Vec::new();
        for (from, records) in entity_in {
            arrivals.extend(records.into_iter().map(|r| (from, r)));
        }
        arrivals.sort_by_key(|(_, r)| (r.kind, r.level()));

        let mut outcome = TransferOutcome::default();
        for (from, rec) in arrivals {
            let gid = GlobalId::new(rec.gid())?;
            let kind = EntityKind::from_wire(rec.kind)
                .ok_or_else(|| MeshReplicaError::comm(from, format!("bad kind {}", rec.kind)))?;
            let prio = Priority::from_wire(rec.prio)
                .ok_or_else(|| MeshReplicaError::comm(from, format!("bad priority {}", rec.prio)))?;
            match self.local_id(gid) {
                Some(entity) if mg.contains(entity) => {
                    mg.get_mut(entity)?.priority = prio;
                    outcome.updated.push(entity);
                }
                _ => {
                    let entity = self.materialize(mg, gid, kind, prio, &rec)?;
                    outcome.arrived.push(entity);
                }
            }
        }

        // 4) replica-list updates
        for (_, records) in update_in {
            for rec in &records {
                let gid = GlobalId::new(rec.gid())?;
                let Some(entity) = self.local_id(gid).filter(|&e| mg.contains(e)) else {
                    // update for a copy this rank no longer holds
                    continue;
                };
                if rec.rank() == self.rank() {
                    continue;
                }
                match rec.op {
                    WireReplicaUpdate::OP_REMOVE => self.remove_replica(entity, rec.rank()),
                    _ => {
                        let prio = Priority::from_wire(rec.prio).ok_or_else(|| {
                            MeshReplicaError::comm(rec.rank(), format!("bad priority {}", rec.prio))
                        })?;
                        self.set_replica(entity, rec.rank(), prio);
                    }
                }
            }
        }

        // 5) local deletions close the transaction
        for entity in deletes {
            if mg.contains(entity) {
                mg.remove(entity)?;
                self.forget(entity);
                outcome.deleted += 1;
            }
        }
        Ok(outcome)
    }

    /// Create a local replica from an incoming record, resolving father and
    /// corner references through the global index. Unresolvable corners become
    /// placeholder ghost nodes; an unresolvable father leaves the link unset.
    fn materialize(
        &mut self,
        mg: &mut Multigrid,
        gid: GlobalId,
        kind: EntityKind,
        prio: Priority,
        rec: &WireEntity,
    ) -> Result<EntityId, MeshReplicaError> {
        let level = rec.level();
        let mut corners = Vec::with_capacity(rec.corners().len());
        for cg in rec.corners() {
            let cgid = GlobalId::new(cg)?;
            let corner = match self.local_id(cgid).filter(|&c| mg.contains(c)) {
                Some(c) => c,
                None => {
                    let placeholder =
                        mg.insert(Entity::new_with_priority(EntityKind::Node, level, Priority::HGhost));
                    self.bind_global(placeholder, cgid)?;
                    placeholder
                }
            };
            corners.push(corner);
        }
        let mut e = Entity::new_with_priority(kind, level, prio);
        e.corners = corners;
        let entity = mg.insert(e);
        self.bind_global(entity, gid)?;
        if rec.father_gid() != 0 {
            let fgid = GlobalId::new(rec.father_gid())?;
            if let Some(father) = self.local_id(fgid).filter(|&f| mg.contains(f)) {
                if mg.get(father)?.level + 1 == level {
                    mg.link_father_child(father, entity)?;
                }
            }
        }
        Ok(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::comm::spawn_ranks;
    use serial_test::serial;

    #[test]
    fn bracket_required_for_requests() {
        let mut mg = Multigrid::new();
        let e = mg.insert(Entity::new(EntityKind::Node, 0));
        let mut dir = Directory::new(0, 2);
        assert!(matches!(
            dir.schedule_copy(&mg, e, 1, Priority::HGhost),
            Err(MeshReplicaError::NoOpenBracket("transfer"))
        ));
        assert!(matches!(
            dir.schedule_delete(e),
            Err(MeshReplicaError::NoOpenBracket("transfer"))
        ));
    }

    #[test]
    fn duplicate_copy_merges_to_strongest() {
        let mut mg = Multigrid::new();
        let e = mg.insert(Entity::new(EntityKind::Element, 0));
        let mut dir = Directory::new(0, 2);
        dir.begin_transfer().unwrap();
        dir.schedule_copy(&mg, e, 1, Priority::HGhost).unwrap();
        dir.schedule_copy(&mg, e, 1, Priority::VGhost).unwrap();
        let Bracket::Transfer(state) = &dir.bracket else {
            panic!("transfer bracket open")
        };
        assert_eq!(state.copies.len(), 1);
        assert_eq!(state.copies[0].priority, Priority::VHGhost);
    }

    #[test]
    #[serial]
    fn element_moves_with_its_corners() {
        let out = spawn_ranks(2, |comm| {
            let me = comm.rank();
            let mut mg = Multigrid::new();
            let mut dir = Directory::new(me, 2);
            dir.begin_transfer().unwrap();
            if me == 0 {
                let n0 = mg.insert(Entity::new(EntityKind::Node, 0));
                let n1 = mg.insert(Entity::new(EntityKind::Node, 0));
                let mut el = Entity::new(EntityKind::Element, 0);
                el.corners = vec![n0, n1];
                let el = mg.insert(el);
                dir.schedule_copy(&mg, n0, 1, Priority::Master).unwrap();
                dir.schedule_copy(&mg, n1, 1, Priority::Master).unwrap();
                dir.schedule_copy(&mg, el, 1, Priority::Master).unwrap();
                dir.schedule_delete(n0).unwrap();
                dir.schedule_delete(n1).unwrap();
                dir.schedule_delete(el).unwrap();
            }
            let outcome = dir.end_transfer(&mut mg, &comm).unwrap();
            let elements = mg.ids_at(0, EntityKind::Element).len();
            let nodes = mg.ids_at(0, EntityKind::Node).len();
            (outcome.arrived.len(), outcome.deleted, elements, nodes)
        });
        // rank 0 deleted its three entities, rank 1 received them
        assert_eq!(out[0], (0, 3, 0, 0));
        assert_eq!(out[1].0, 3);
        assert_eq!(out[1].2, 1);
        assert_eq!(out[1].3, 2);
    }

    #[test]
    #[serial]
    fn ghost_copy_updates_replica_lists_on_both_sides() {
        let out = spawn_ranks(2, |comm| {
            let me = comm.rank();
            let mut mg = Multigrid::new();
            let mut dir = Directory::new(me, 2);
            dir.begin_transfer().unwrap();
            let local = if me == 0 {
                let e = mg.insert(Entity::new(EntityKind::Element, 0));
                dir.schedule_copy(&mg, e, 1, Priority::HGhost).unwrap();
                Some(e)
            } else {
                None
            };
            let outcome = dir.end_transfer(&mut mg, &comm).unwrap();
            if me == 0 {
                let e = local.unwrap();
                let reps = dir.remote_replicas(e).to_vec();
                (reps.len(), reps[0].rank, reps[0].priority)
            } else {
                let e = outcome.arrived[0];
                let reps = dir.remote_replicas(e).to_vec();
                assert_eq!(mg.get(e).unwrap().priority, Priority::HGhost);
                (reps.len(), reps[0].rank, reps[0].priority)
            }
        });
        assert_eq!(out[0], (1, 1, Priority::HGhost));
        assert_eq!(out[1], (1, 0, Priority::Master));
    }
}
