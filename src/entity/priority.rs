//! Replica priorities: who masters an entity and why a ghost copy exists.

use std::fmt;

/// Classification of one replica of an entity.
///
/// Exactly one replica of every entity is `Master` once a phase has converged.
/// `Border` is a master-eligible replica demoted by the min-rank tie-break.
/// Ghost replicas record *why* they are kept: a horizontal (same-level
/// neighbor) obligation, a vertical (ancestor/descendant) obligation, or both.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[repr(u8)]
pub enum Priority {
    /// Single authoritative replica.
    Master = 0,
    /// Master-eligible replica that lost the ownership tie-break.
    Border = 1,
    /// Kept for a same-level neighbor of a local master.
    HGhost = 2,
    /// Kept for an ancestor/descendant of a local master.
    VGhost = 3,
    /// Both horizontal and vertical obligations.
    VHGhost = 4,
}

impl Priority {
    /// True for every non-authoritative, non-border copy.
    #[inline]
    pub fn is_ghost(self) -> bool {
        matches!(self, Priority::HGhost | Priority::VGhost | Priority::VHGhost)
    }

    /// True for replicas that may win the master tie-break.
    #[inline]
    pub fn is_master_eligible(self) -> bool {
        matches!(self, Priority::Master | Priority::Border)
    }

    /// True when this copy carries a horizontal-overlap obligation.
    #[inline]
    pub fn has_horizontal(self) -> bool {
        matches!(self, Priority::HGhost | Priority::VHGhost)
    }

    /// True when this copy carries a vertical-overlap obligation.
    #[inline]
    pub fn has_vertical(self) -> bool {
        matches!(self, Priority::VGhost | Priority::VHGhost)
    }

    /// Ghost classification from the two obligation bits, if any obligation
    /// remains.
    #[inline]
    pub fn ghost_from_obligations(horizontal: bool, vertical: bool) -> Option<Priority> {
        match (horizontal, vertical) {
            (true, true) => Some(Priority::VHGhost),
            (true, false) => Some(Priority::HGhost),
            (false, true) => Some(Priority::VGhost),
            (false, false) => None,
        }
    }

    /// Strongest-classification combinator used when propagating element
    /// priorities onto incident nodes and edges: master-eligibility dominates,
    /// then combined ghost obligations.
    pub fn strongest(self, other: Priority) -> Priority {
        use Priority::*;
        match (self, other) {
            (Master, _) | (_, Master) => Master,
            (Border, _) | (_, Border) => Border,
            (a, b) => Priority::ghost_from_obligations(
                a.has_horizontal() || b.has_horizontal(),
                a.has_vertical() || b.has_vertical(),
            )
            // both sides are ghosts, so at least one obligation is set
            .unwrap_or(a),
        }
    }

    /// Wire encoding (one byte).
    #[inline]
    pub fn to_wire(self) -> u8 {
        self as u8
    }

    /// Decode the wire byte; unknown values fall back to `None`.
    #[inline]
    pub fn from_wire(raw: u8) -> Option<Priority> {
        match raw {
            0 => Some(Priority::Master),
            1 => Some(Priority::Border),
            2 => Some(Priority::HGhost),
            3 => Some(Priority::VGhost),
            4 => Some(Priority::VHGhost),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Master => "Master",
            Priority::Border => "Border",
            Priority::HGhost => "HGhost",
            Priority::VGhost => "VGhost",
            Priority::VHGhost => "VHGhost",
        };
        f.write_str(s)
    }
}
