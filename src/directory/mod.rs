//! Per-rank view of the distributed-object replication service.
//!
//! The [`Directory`] tracks, for every locally replicated entity, its stable
//! [`GlobalId`] and the set of other ranks holding replicas (with their
//! priorities). It owns the global-id allocator, the declared exchange
//! [`Interface`]s, and the collective identify/transfer brackets; at most one
//! bracket may be open at a time.

pub mod comm;
pub mod exchange;
pub mod identify;
pub mod interface;
pub mod transfer;
pub mod wire;

use crate::directory::comm::Communicator;
use crate::directory::interface::{Direction, Interface, InterfaceHandle};
use crate::directory::wire::WireKeyed;
use crate::entity::EntityKind;
use crate::entity::id::{EntityId, GlobalId};
use crate::entity::priority::Priority;
use crate::grid::Multigrid;
use crate::replica_error::MeshReplicaError;
use bytemuck::Zeroable;
use hashbrown::HashMap;
use std::collections::HashMap as StdHashMap;

/// One remote copy of a local entity.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Replica {
    pub rank: usize,
    pub priority: Priority,
}

/// Records received by [`Directory::bulk_exchange`], resolved to local
/// entities, plus the count of records that no longer resolve here.
pub struct BulkExchangeResult<T> {
    pub received: Vec<(EntityId, usize, T)>,
    pub unmatched: usize,
}

impl<T> Default for BulkExchangeResult<T> {
    fn default() -> Self {
        BulkExchangeResult {
            received: Vec::new(),
            unmatched: 0,
        }
    }
}

pub(crate) enum Bracket {
    Closed,
    Identify(identify::IdentifyState),
    Transfer(transfer::TransferState),
}

impl Bracket {
    fn name(&self) -> &'static str {
        match self {
            Bracket::Closed => "none",
            Bracket::Identify(_) => "identify",
            Bracket::Transfer(_) => "transfer",
        }
    }
}

/// Per-rank replication directory.
pub struct Directory {
    rank: usize,
    size: usize,
    next_global: u64,
    global_of: HashMap<EntityId, GlobalId>,
    local_of: HashMap<GlobalId, EntityId>,
    /// Remote replicas per entity; the local copy's priority lives on the
    /// entity itself.
    replicas: HashMap<EntityId, Vec<Replica>>,
    interfaces: Vec<Interface>,
    pub(crate) bracket: Bracket,
    /// Key tuples identified in past rounds, kept so a late counterpart from a
    /// multi-hop round still matches. Entities listed here must not be
    /// destroyed while identification may still reference them.
    pub(crate) key_index: HashMap<identify::KeyTuple, EntityId>,
    /// Remote claims with no local counterpart yet, carried between identify
    /// brackets until the multi-hop round that creates the counterpart.
    pub(crate) carried_claims: StdHashMap<identify::KeyTuple, Vec<(usize, Priority)>>,
}

impl Directory {
    pub fn new(rank: usize, size: usize) -> Self {
        Directory {
            rank,
            size,
            next_global: 0,
            global_of: HashMap::new(),
            local_of: HashMap::new(),
            replicas: HashMap::new(),
            interfaces: Vec::new(),
            bracket: Bracket::Closed,
            key_index: HashMap::new(),
            carried_claims: StdHashMap::new(),
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    // --- global ids -------------------------------------------------------

    /// Allocate a fresh global id from this rank's stride; ids allocated
    /// independently on different ranks never collide.
    pub fn alloc_global(&mut self) -> GlobalId {
        let raw = self.next_global * (self.size as u64) + (self.rank as u64) + 1;
        self.next_global += 1;
        GlobalId::new(raw).expect("strided allocator never yields zero")
    }

    /// Global id of an entity, if assigned.
    pub fn global_id(&self, entity: EntityId) -> Option<GlobalId> {
        self.global_of.get(&entity).copied()
    }

    /// Local handle bound to a global id, if replicated here.
    pub fn local_id(&self, gid: GlobalId) -> Option<EntityId> {
        self.local_of.get(&gid).copied()
    }

    /// Bind `gid` to `entity`. Rebinding to a different id, or binding an id
    /// already carried by another entity, is a fault.
    pub fn bind_global(
        &mut self,
        entity: EntityId,
        gid: GlobalId,
    ) -> Result<(), MeshReplicaError> {
        if let Some(&existing) = self.global_of.get(&entity) {
            if existing != gid {
                return Err(MeshReplicaError::GlobalIdRebind {
                    entity,
                    existing,
                    requested: gid,
                });
            }
            return Ok(());
        }
        if let Some(&other) = self.local_of.get(&gid) {
            if other != entity {
                return Err(MeshReplicaError::GlobalIdCollision(gid));
            }
        }
        self.global_of.insert(entity, gid);
        self.local_of.insert(gid, entity);
        Ok(())
    }

    /// Global id of an entity, allocating one if missing.
    pub fn ensure_global(&mut self, entity: EntityId) -> Result<GlobalId, MeshReplicaError> {
        if let Some(gid) = self.global_id(entity) {
            return Ok(gid);
        }
        let gid = self.alloc_global();
        self.bind_global(entity, gid)?;
        Ok(gid)
    }

    // --- replica lists ----------------------------------------------------

    /// Remote replicas of an entity (the local copy is not listed).
    pub fn remote_replicas(&self, entity: EntityId) -> &[Replica] {
        self.replicas.get(&entity).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Full `(rank, priority)` view including the local copy.
    pub fn replica_list(
        &self,
        mg: &Multigrid,
        entity: EntityId,
    ) -> Result<Vec<Replica>, MeshReplicaError> {
        let mut out = vec![Replica {
            rank: self.rank,
            priority: mg.get(entity)?.priority,
        }];
        out.extend_from_slice(self.remote_replicas(entity));
        out.sort_by_key(|r| r.rank);
        Ok(out)
    }

    /// Insert or update the `(rank, priority)` entry on an entity's list.
    pub fn set_replica(&mut self, entity: EntityId, rank: usize, priority: Priority) {
        debug_assert_ne!(rank, self.rank, "local copy is not a remote replica");
        let list = self.replicas.entry(entity).or_default();
        match list.iter_mut().find(|r| r.rank == rank) {
            Some(r) => r.priority = priority,
            None => list.push(Replica { rank, priority }),
        }
    }

    /// Drop the replica entry for `rank`.
    pub fn remove_replica(&mut self, entity: EntityId, rank: usize) {
        if let Some(list) = self.replicas.get_mut(&entity) {
            list.retain(|r| r.rank != rank);
            if list.is_empty() {
                self.replicas.remove(&entity);
            }
        }
    }

    /// Ranks holding any replica of `entity` besides this one.
    pub fn replica_ranks(&self, entity: EntityId) -> Vec<usize> {
        self.remote_replicas(entity).iter().map(|r| r.rank).collect()
    }

    /// True when some other rank holds a master-eligible copy that wins the
    /// min-rank tie-break.
    pub fn master_rank(&self, mg: &Multigrid, entity: EntityId) -> Result<usize, MeshReplicaError> {
        let list = self.replica_list(mg, entity)?;
        let winner = list
            .iter()
            .filter(|r| r.priority.is_master_eligible())
            .map(|r| r.rank)
            .min();
        winner.ok_or(MeshReplicaError::MasterCountViolation { entity, count: 0 })
    }

    /// Forget every directory record of a destroyed entity.
    pub fn forget(&mut self, entity: EntityId) {
        if let Some(gid) = self.global_of.remove(&entity) {
            self.local_of.remove(&gid);
        }
        self.replicas.remove(&entity);
        self.key_index.retain(|_, &mut e| e != entity);
    }

    // --- interfaces & bulk exchange ----------------------------------------

    /// Declare a communication group once at startup.
    pub fn declare_interface(
        &mut self,
        kinds: Vec<EntityKind>,
        send_priorities: Vec<Priority>,
        recv_priorities: Vec<Priority>,
        direction: Direction,
    ) -> InterfaceHandle {
        self.interfaces.push(Interface {
            kinds,
            send_priorities,
            recv_priorities,
            direction,
        });
        InterfaceHandle(self.interfaces.len() - 1)
    }

    pub fn interface(&self, handle: InterfaceHandle) -> Result<&Interface, MeshReplicaError> {
        self.interfaces
            .get(handle.0)
            .ok_or(MeshReplicaError::UnknownInterface(handle.0))
    }

    /// Interface-scoped gather/scatter exchange of fixed-size records.
    ///
    /// `gather` produces the record one sending replica contributes toward one
    /// receiving rank (`None` to contribute nothing). Received records are
    /// resolved to local entities by their global id and handed back to the
    /// caller for application; records whose global id resolves to no local
    /// entity are counted as `unmatched` (stale senders); callers that treat
    /// staleness as a fault count it themselves.
    pub fn bulk_exchange<T, C, G>(
        &self,
        handle: InterfaceHandle,
        mg: &Multigrid,
        comm: &C,
        base_tag: u16,
        mut gather: G,
    ) -> Result<BulkExchangeResult<T>, MeshReplicaError>
    where
        T: WireKeyed + Zeroable + Copy,
        C: Communicator,
        G: FnMut(&Multigrid, EntityId, GlobalId, usize) -> Option<T>,
    {
        let iface = self.interface(handle)?.clone();
        let mut outgoing: StdHashMap<usize, Vec<T>> = StdHashMap::new();

        for (&entity, list) in self.replicas.iter() {
            let local_prio = match mg.get(entity) {
                Ok(e) if iface.covers(e.kind) => e.priority,
                _ => continue,
            };
            let Some(gid) = self.global_id(entity) else {
                continue;
            };
            for rep in list {
                let forward = iface.sends_from(local_prio) && iface.receives_at(rep.priority);
                let reverse = iface.direction == Direction::Paired
                    && iface.receives_at(local_prio)
                    && iface.sends_from(rep.priority);
                if forward || reverse {
                    if let Some(record) = gather(mg, entity, gid, rep.rank) {
                        outgoing.entry(rep.rank).or_default().push(record);
                    }
                }
            }
        }

        let incoming = exchange::exchange_records(comm, base_tag, &outgoing)?;
        let mut result = BulkExchangeResult::default();
        for (from, records) in incoming {
            for record in records {
                let gid = GlobalId::new(record.gid())?;
                match self.local_id(gid) {
                    Some(entity) if mg.contains(entity) => {
                        result.received.push((entity, from, record));
                    }
                    _ => result.unmatched += 1,
                }
            }
        }
        Ok(result)
    }

    // --- bracket plumbing ---------------------------------------------------

    pub(crate) fn ensure_closed(&self, requested: &'static str) -> Result<(), MeshReplicaError> {
        match self.bracket {
            Bracket::Closed => Ok(()),
            _ => Err(MeshReplicaError::BracketOpen {
                requested,
                open: self.bracket.name(),
            }),
        }
    }
}
