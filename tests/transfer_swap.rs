//! Two ranks swap the two middle elements of a four-element line in one
//! migration step. Entity mass must be conserved: four element masters and
//! five node masters in total, and every rank ends with a full one-deep
//! overlap around its masters.

use mesh_replica::directory::comm::spawn_ranks;
use mesh_replica::grid::build;
use mesh_replica::prelude::*;
use serial_test::serial;

fn gid(raw: u64) -> GlobalId {
    GlobalId::new(raw).unwrap()
}

/// Line `n0 -E0- n1 -E1- n2 -E2- n3 -E3- n4`, split 2/2 with a one-deep
/// element overlap across the cut at n2.
fn seed_rank(mg: &mut Multigrid, dir: &mut Directory, me: usize) -> Vec<EntityId> {
    let node = |mg: &mut Multigrid, p| mg.insert(Entity::new_with_priority(EntityKind::Node, 0, p));
    if me == 0 {
        let n0 = node(mg, Priority::Master);
        let n1 = node(mg, Priority::Master);
        let n2 = node(mg, Priority::Master);
        let n3 = node(mg, Priority::HGhost);
        let e0 = build::ghost_element(mg, 0, vec![n0, n1], Priority::Master);
        let e1 = build::ghost_element(mg, 0, vec![n1, n2], Priority::Master);
        let e2 = build::ghost_element(mg, 0, vec![n2, n3], Priority::HGhost);
        for (h, g) in [(n0, 10), (n1, 20), (n2, 30), (n3, 40), (e0, 100), (e1, 101), (e2, 102)] {
            dir.bind_global(h, gid(g)).unwrap();
        }
        dir.set_replica(n2, 1, Priority::Border);
        dir.set_replica(n3, 1, Priority::Master);
        dir.set_replica(e1, 1, Priority::HGhost);
        dir.set_replica(e2, 1, Priority::Master);
        mg.connect_level(0).unwrap();
        vec![e0, e1, e2]
    } else {
        let n1 = node(mg, Priority::HGhost);
        let n2 = node(mg, Priority::Border);
        let n3 = node(mg, Priority::Master);
        let n4 = node(mg, Priority::Master);
        let e1 = build::ghost_element(mg, 0, vec![n1, n2], Priority::HGhost);
        let e2 = build::ghost_element(mg, 0, vec![n2, n3], Priority::Master);
        let e3 = build::ghost_element(mg, 0, vec![n3, n4], Priority::Master);
        for (h, g) in [(n1, 20), (n2, 30), (n3, 40), (n4, 50), (e1, 101), (e2, 102), (e3, 103)] {
            dir.bind_global(h, gid(g)).unwrap();
        }
        dir.set_replica(n1, 0, Priority::Master);
        dir.set_replica(n2, 0, Priority::Master);
        dir.set_replica(n3, 0, Priority::HGhost);
        dir.set_replica(e1, 0, Priority::Master);
        dir.set_replica(e2, 0, Priority::HGhost);
        mg.connect_level(0).unwrap();
        vec![e1, e2, e3]
    }
}

#[test]
#[serial]
fn swapping_the_middle_elements_conserves_mass() {
    let out = spawn_ranks(2, |comm| {
        let me = comm.rank();
        let mut mg = Multigrid::new();
        let mut dir = Directory::new(me, 2);
        let ifaces = declare_standard_interfaces(&mut dir);
        let els = seed_rank(&mut mg, &mut dir, me);

        // rank 0 hands E1 to rank 1; rank 1 hands E2 to rank 0
        if me == 0 {
            mg.get_mut(els[1]).unwrap().target_rank = Some(1);
        } else {
            mg.get_mut(els[1]).unwrap().target_rank = Some(0);
        }
        restrict_partitioning(&mut mg, &mut dir, &comm, &ifaces).unwrap();
        let moved = migrate_level(&mut mg, &mut dir, &comm, &ifaces, 0).unwrap();

        let count = |kind: EntityKind, pred: fn(Priority) -> bool| {
            mg.ids_at(0, kind)
                .into_iter()
                .filter(|&e| pred(mg.get(e).unwrap().priority))
                .count()
        };
        (
            moved,
            count(EntityKind::Element, |p| p == Priority::Master),
            count(EntityKind::Element, |p| p.is_ghost()),
            count(EntityKind::Node, |p| p == Priority::Master),
        )
    });

    // each rank moved exactly one master out and still masters two elements
    for o in &out {
        assert_eq!(o.0, 1);
        assert_eq!(o.1, 2);
        assert!(o.2 >= 1, "overlap around the new master must exist");
    }
    // mass conservation: four element masters, five node masters in total
    assert_eq!(out[0].1 + out[1].1, 4);
    assert_eq!(out[0].3 + out[1].3, 5);
}
