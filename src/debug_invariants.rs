//! Opt-in structural invariant checks, compiled to nothing in release builds.
//!
//! These assert the relations the rest of the crate is allowed to assume:
//! father/child links agree in both directions and span exactly one level,
//! neighbor links are symmetric and same-level, and corner lists reference
//! live same-level nodes.

use crate::entity::EntityKind;
use crate::grid::Multigrid;

pub trait DebugInvariants {
    /// Panic on the first violated structural invariant.
    fn debug_assert_invariants(&self);
}

impl DebugInvariants for Multigrid {
    fn debug_assert_invariants(&self) {
        for id in self.ids() {
            let e = self.get(id).expect("id came from the live set");
            if let Some(f) = e.father {
                let father = self.get(f).expect("father link must be live");
                assert_eq!(
                    father.level + 1,
                    e.level,
                    "father {f} of {id} spans more than one level"
                );
                assert!(
                    father.children.contains(&id),
                    "father {f} does not list child {id}"
                );
            }
            for &c in &e.children {
                let child = self.get(c).expect("child link must be live");
                assert_eq!(child.father, Some(id), "child {c} does not point back to {id}");
            }
            for n in e.resolved_neighbors() {
                let nbr = self.get(n).expect("neighbor link must be live");
                assert_eq!(nbr.level, e.level, "neighbor {n} of {id} is cross-level");
                assert!(
                    nbr.resolved_neighbors().any(|b| b == id),
                    "neighbor link {id} -> {n} is one-way"
                );
            }
            for &c in &e.corners {
                let corner = self.get(c).expect("corner link must be live");
                assert_eq!(corner.kind, EntityKind::Node, "corner {c} of {id} is not a node");
                assert_eq!(corner.level, e.level, "corner {c} of {id} is cross-level");
            }
        }
    }
}

/// Run the [`DebugInvariants`] check on `$subject` in debug builds only.
#[macro_export]
macro_rules! debug_invariants {
    ($subject:expr) => {
        if cfg!(debug_assertions) {
            $crate::debug_invariants::DebugInvariants::debug_assert_invariants(&$subject);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::grid::build;

    #[test]
    fn healthy_mesh_passes() {
        let mut mg = Multigrid::new();
        let mesh = build::line_mesh(&mut mg, 2).unwrap();
        build::refine_segment(&mut mg, mesh.elements[0]).unwrap();
        debug_invariants!(mg);
    }

    #[test]
    #[should_panic(expected = "one-way")]
    fn asymmetric_neighbor_link_panics() {
        let mut mg = Multigrid::new();
        let a = mg.insert(Entity::new(EntityKind::Element, 0));
        let b = mg.insert(Entity::new(EntityKind::Element, 0));
        mg.get_mut(a).unwrap().neighbors.push(Some(b));
        mg.debug_assert_invariants();
    }
}
