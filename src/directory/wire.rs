//! Fixed, versioned, little-endian wire records for the collective phases.
//!
//! All multi-byte integers are little-endian on the wire: stored pre-LE with
//! `.to_le()` and decoded with `from_le()`. Every record is `#[repr(C)]`
//! `Pod`, so buffers cast to and from byte slices without copies, and the
//! payload size contract of every exchange is the record size itself.

use bytemuck::{Pod, Zeroable};
use std::mem::{align_of, size_of};

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 2;

/// Maximum number of key entities in one identification tuple (a 3D side node
/// needs the four face corners).
pub const MAX_IDENTIFY_KEYS: usize = 4;

/// Maximum corner count of a transferable entity (hexahedron).
pub const MAX_CORNERS: usize = 8;

/// Records that carry the global id of the entity they describe, so receivers
/// can resolve them against the local index.
pub trait WireKeyed: Pod {
    fn gid(&self) -> u64;
}

/// Count of following records.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32,
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u32).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

/// One-byte-payload logical flag, used for the OR-reduced convergence vote.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireFlag {
    pub v_le: u32,
}

impl WireFlag {
    pub fn new(v: bool) -> Self {
        Self {
            v_le: (v as u32).to_le(),
        }
    }
    pub fn get(&self) -> bool {
        u32::from_le(self.v_le) != 0
    }
}

/// One identification claim: "my new `kind` entity is defined by these
/// already-identified keys".
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireIdentify {
    pub kind: u8,
    pub nkeys: u8,
    pub prio: u8,
    pub _pad: u8,
    pub level_le: u32,
    pub keys_le: [u64; MAX_IDENTIFY_KEYS],
}

impl WireIdentify {
    pub const SIZE: usize = 40;

    pub fn new(kind: u8, prio: u8, level: u32, keys: &[u64]) -> Self {
        debug_assert!(keys.len() <= MAX_IDENTIFY_KEYS);
        let mut keys_le = [0u64; MAX_IDENTIFY_KEYS];
        for (slot, &k) in keys_le.iter_mut().zip(keys.iter()) {
            *slot = k.to_le();
        }
        Self {
            kind,
            nkeys: keys.len() as u8,
            prio,
            _pad: 0,
            level_le: level.to_le(),
            keys_le,
        }
    }

    pub fn level(&self) -> u32 {
        u32::from_le(self.level_le)
    }

    pub fn keys(&self) -> Vec<u64> {
        self.keys_le[..self.nkeys as usize]
            .iter()
            .map(|&k| u64::from_le(k))
            .collect()
    }
}

/// Full entity record used by transfer commits and overlap replication.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireEntity {
    pub gid_le: u64,
    /// 0 when the entity has no father or the father is not replicated here.
    pub father_gid_le: u64,
    pub kind: u8,
    pub prio: u8,
    pub ncorners: u8,
    pub _pad: u8,
    pub level_le: u32,
    pub corners_le: [u64; MAX_CORNERS],
}

impl WireEntity {
    pub const SIZE: usize = 88;

    pub fn new(
        gid: u64,
        father_gid: u64,
        kind: u8,
        prio: u8,
        level: u32,
        corners: &[u64],
    ) -> Self {
        debug_assert!(corners.len() <= MAX_CORNERS);
        let mut corners_le = [0u64; MAX_CORNERS];
        for (slot, &c) in corners_le.iter_mut().zip(corners.iter()) {
            *slot = c.to_le();
        }
        Self {
            gid_le: gid.to_le(),
            father_gid_le: father_gid.to_le(),
            kind,
            prio,
            ncorners: corners.len() as u8,
            _pad: 0,
            level_le: level.to_le(),
            corners_le,
        }
    }

    pub fn father_gid(&self) -> u64 {
        u64::from_le(self.father_gid_le)
    }

    pub fn level(&self) -> u32 {
        u32::from_le(self.level_le)
    }

    pub fn corners(&self) -> Vec<u64> {
        self.corners_le[..self.ncorners as usize]
            .iter()
            .map(|&c| u64::from_le(c))
            .collect()
    }
}

impl WireKeyed for WireEntity {
    fn gid(&self) -> u64 {
        u64::from_le(self.gid_le)
    }
}

/// Replica-list maintenance record: set or remove `(rank, priority)` on the
/// replica list of the entity with `gid`.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireReplicaUpdate {
    pub gid_le: u64,
    pub rank_le: u32,
    /// 0 = set, 1 = remove.
    pub op: u8,
    pub prio: u8,
    pub _pad: [u8; 2],
}

impl WireReplicaUpdate {
    pub const SIZE: usize = 16;
    pub const OP_SET: u8 = 0;
    pub const OP_REMOVE: u8 = 1;

    pub fn set(gid: u64, rank: usize, prio: u8) -> Self {
        Self {
            gid_le: gid.to_le(),
            rank_le: (rank as u32).to_le(),
            op: Self::OP_SET,
            prio,
            _pad: [0; 2],
        }
    }

    pub fn remove(gid: u64, rank: usize) -> Self {
        Self {
            gid_le: gid.to_le(),
            rank_le: (rank as u32).to_le(),
            op: Self::OP_REMOVE,
            prio: 0,
            _pad: [0; 2],
        }
    }

    pub fn rank(&self) -> usize {
        u32::from_le(self.rank_le) as usize
    }
}

impl WireKeyed for WireReplicaUpdate {
    fn gid(&self) -> u64 {
        u64::from_le(self.gid_le)
    }
}

/// Partition-restriction record: a target rank plus the used-mark, OR-reduced
/// onto the master copy on the way up and broadcast on the way down.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireTargetMark {
    pub gid_le: u64,
    pub target_le: u32,
    pub used_le: u32,
}

impl WireTargetMark {
    pub const SIZE: usize = 16;

    pub fn new(gid: u64, target: usize, used: bool) -> Self {
        Self {
            gid_le: gid.to_le(),
            target_le: (target as u32).to_le(),
            used_le: (used as u32).to_le(),
        }
    }

    pub fn target(&self) -> usize {
        u32::from_le(self.target_le) as usize
    }

    pub fn used(&self) -> bool {
        u32::from_le(self.used_le) != 0
    }
}

impl WireKeyed for WireTargetMark {
    fn gid(&self) -> u64 {
        u64::from_le(self.gid_le)
    }
}

/// Consistency-check record: one rank's view of a shared entity.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WirePriorityClaim {
    pub gid_le: u64,
    pub kind: u8,
    pub prio: u8,
    pub _pad: [u8; 6],
}

impl WirePriorityClaim {
    pub const SIZE: usize = 16;

    pub fn new(gid: u64, kind: u8, prio: u8) -> Self {
        Self {
            gid_le: gid.to_le(),
            kind,
            prio,
            _pad: [0; 6],
        }
    }
}

impl WireKeyed for WirePriorityClaim {
    fn gid(&self) -> u64 {
        u64::from_le(self.gid_le)
    }
}

// ===== Compile-time sanity checks =========================================

const _: () = {
    assert!(size_of::<WireCount>() == 4);
    assert!(size_of::<WireFlag>() == 4);
    assert!(size_of::<WireIdentify>() == WireIdentify::SIZE);
    assert!(size_of::<WireEntity>() == WireEntity::SIZE);
    assert!(size_of::<WireReplicaUpdate>() == WireReplicaUpdate::SIZE);
    assert!(size_of::<WireTargetMark>() == WireTargetMark::SIZE);
    assert!(size_of::<WirePriorityClaim>() == WirePriorityClaim::SIZE);
    assert!(align_of::<WireIdentify>() == 8);
    assert!(align_of::<WireEntity>() == 8);
};
