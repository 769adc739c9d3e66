//! Declared communication groups scoping bulk gather/scatter exchanges.
//!
//! An [`Interface`] is immutable after declaration: the participating entity
//! kinds, the sender- and receiver-priority subsets, and whether the exchange
//! also runs in the reverse pairing.

use crate::entity::EntityKind;
use crate::entity::priority::Priority;

/// Exchange orientation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Sender subset pushes to receiver subset only.
    Forward,
    /// Both pairings run: sender→receiver and receiver→sender.
    Paired,
}

/// Immutable description of one communication group.
#[derive(Clone, Debug)]
pub struct Interface {
    pub kinds: Vec<EntityKind>,
    pub send_priorities: Vec<Priority>,
    pub recv_priorities: Vec<Priority>,
    pub direction: Direction,
}

impl Interface {
    pub fn sends_from(&self, p: Priority) -> bool {
        self.send_priorities.contains(&p)
    }

    pub fn receives_at(&self, p: Priority) -> bool {
        self.recv_priorities.contains(&p)
    }

    pub fn covers(&self, kind: EntityKind) -> bool {
        self.kinds.contains(&kind)
    }
}

/// Index of a declared interface within the directory.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct InterfaceHandle(pub(crate) usize);
