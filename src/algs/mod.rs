//! The five structural protocols that run on top of the replication
//! directory: identification, priority resolution, partition restriction,
//! migration and consistency checking.

pub mod check;
pub mod identify;
pub mod priority;
pub mod restrict;
pub mod transfer;

use crate::directory::Directory;
use crate::directory::interface::{Direction, InterfaceHandle};
use crate::entity::EntityKind;
use crate::entity::priority::Priority;

/// The communication groups every structural protocol needs, declared once at
/// startup.
#[derive(Copy, Clone, Debug)]
pub struct StandardInterfaces {
    /// Every kind, every priority pairing, both directions. Carries the
    /// priority push after resolution and the verifier's claims.
    pub all_shared: InterfaceHandle,
    /// Element masters toward their ghost copies (target broadcasts,
    /// ghost-destination refresh).
    pub element_down: InterfaceHandle,
    /// Element ghost copies toward their master (used-mark reduction).
    pub element_up: InterfaceHandle,
}

/// Declare the standard interfaces on a fresh directory.
pub fn declare_standard_interfaces(dir: &mut Directory) -> StandardInterfaces {
    let all = vec![
        Priority::Master,
        Priority::Border,
        Priority::HGhost,
        Priority::VGhost,
        Priority::VHGhost,
    ];
    let ghosts = vec![Priority::HGhost, Priority::VGhost, Priority::VHGhost];
    let owners = vec![Priority::Master, Priority::Border];
    let kinds = vec![
        EntityKind::Node,
        EntityKind::Edge,
        EntityKind::Element,
        EntityKind::Vector,
    ];
    StandardInterfaces {
        all_shared: dir.declare_interface(kinds, all.clone(), all, Direction::Paired),
        element_down: dir.declare_interface(
            vec![EntityKind::Element],
            owners.clone(),
            ghosts.clone(),
            Direction::Forward,
        ),
        element_up: dir.declare_interface(
            vec![EntityKind::Element],
            ghosts,
            owners,
            Direction::Forward,
        ),
    }
}
