//! mesh-replica: the distributed consistency layer of a parallel adaptive
//! unstructured-mesh engine.
//!
//! Each rank holds replicas of mesh entities (nodes, edges, elements and
//! attached vectors) across a hierarchy of refinement levels. This crate keeps
//! those replicas consistent as the mesh is refined, repartitioned and
//! migrated:
//!
//! - [`entity`] / [`grid`]: the replicated entity model and the per-rank
//!   multigrid arena.
//! - [`directory`]: the replication directory with global ids, replica lists,
//!   declared exchange interfaces, and the collective identify/transfer
//!   brackets everything else is built on.
//! - [`algs`]: the structural protocols for cross-rank identification of new
//!   entities, Master/Border/Ghost priority resolution, partition-assignment
//!   restriction, transactional migration and consistency checking.
//! - [`overlap`]: reconstruction of the one-deep ghost overlap after
//!   refinement.
//!
//! Communication is abstracted behind [`directory::comm::Communicator`];
//! [`directory::comm::NoComm`] serves single-rank runs and
//! [`directory::comm::LocalComm`] backs the thread-per-rank test harness.
//! Every collective phase follows the same discipline: symmetric
//! count-then-payload record exchanges that always post and drain every send,
//! so a phase either completes on all ranks or fails with a
//! [`replica_error::MeshReplicaError`] on at least one.

pub mod algs;
pub mod debug_invariants;
pub mod directory;
pub mod entity;
pub mod grid;
pub mod overlap;
pub mod replica_error;

pub mod prelude {
    //! Convenient single-import surface for driver code and tests.
    pub use crate::algs::check::{check, check_local};
    pub use crate::algs::identify::{identify_new_entities, IdentifySummary};
    pub use crate::algs::priority::{resolve_priorities, PriorityReport};
    pub use crate::algs::restrict::restrict_partitioning;
    pub use crate::algs::transfer::migrate_level;
    pub use crate::algs::{declare_standard_interfaces, StandardInterfaces};
    pub use crate::directory::comm::{Communicator, LocalComm, NoComm};
    pub use crate::directory::{Directory, Replica};
    pub use crate::entity::id::{EntityId, GlobalId};
    pub use crate::entity::priority::Priority;
    pub use crate::entity::{Entity, EntityKind, RefineClass};
    pub use crate::grid::{Grid, Multigrid};
    pub use crate::overlap::{update_overlap, OverlapReport};
    pub use crate::replica_error::MeshReplicaError;
}
