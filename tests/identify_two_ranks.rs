//! Two ranks refine adjacent segments independently; the copies of the shared
//! corner node must converge to one identity with exactly one master, and the
//! full consistency check must come back clean.

use mesh_replica::directory::comm::spawn_ranks;
use mesh_replica::grid::build;
use mesh_replica::prelude::*;
use serial_test::serial;

fn gid(raw: u64) -> GlobalId {
    GlobalId::new(raw).unwrap()
}

/// Logical mesh `a --E0-- b --E1-- c`: rank 0 masters E0, rank 1 masters E1,
/// each holds a horizontal ghost of the other element.
fn seed_rank(mg: &mut Multigrid, dir: &mut Directory, me: usize) -> EntityId {
    let (pa, pb, pc) = if me == 0 {
        (Priority::Master, Priority::Master, Priority::HGhost)
    } else {
        (Priority::HGhost, Priority::Border, Priority::Master)
    };
    let a = mg.insert(Entity::new_with_priority(EntityKind::Node, 0, pa));
    let b = mg.insert(Entity::new_with_priority(EntityKind::Node, 0, pb));
    let c = mg.insert(Entity::new_with_priority(EntityKind::Node, 0, pc));
    let (pe0, pe1) = if me == 0 {
        (Priority::Master, Priority::HGhost)
    } else {
        (Priority::HGhost, Priority::Master)
    };
    let e0 = build::ghost_element(mg, 0, vec![a, b], pe0);
    let e1 = build::ghost_element(mg, 0, vec![b, c], pe1);
    dir.bind_global(a, gid(10)).unwrap();
    dir.bind_global(b, gid(20)).unwrap();
    dir.bind_global(c, gid(30)).unwrap();
    dir.bind_global(e0, gid(100)).unwrap();
    dir.bind_global(e1, gid(101)).unwrap();
    let other = 1 - me;
    if me == 0 {
        dir.set_replica(a, other, Priority::HGhost);
        dir.set_replica(b, other, Priority::Border);
        dir.set_replica(c, other, Priority::Master);
        dir.set_replica(e0, other, Priority::HGhost);
        dir.set_replica(e1, other, Priority::Master);
    } else {
        dir.set_replica(a, other, Priority::Master);
        dir.set_replica(b, other, Priority::Master);
        dir.set_replica(c, other, Priority::HGhost);
        dir.set_replica(e0, other, Priority::Master);
        dir.set_replica(e1, other, Priority::HGhost);
    }
    mg.connect_level(0).unwrap();
    if me == 0 { e0 } else { e1 }
}

#[test]
#[serial]
fn mid_nodes_of_a_shared_element_merge_on_the_corner_pair() {
    // both ranks hold the same segment (rank 0 masters it) and refine it; the
    // two mid-node copies have no father and can only merge through the
    // two-key tuple of the father element's corners
    let out = spawn_ranks(2, |comm| {
        let me = comm.rank();
        let mut mg = Multigrid::new();
        let mut dir = Directory::new(me, 2);
        let (pn, pe) = if me == 0 {
            (Priority::Master, Priority::Master)
        } else {
            (Priority::Border, Priority::HGhost)
        };
        let a = mg.insert(Entity::new_with_priority(EntityKind::Node, 0, pn));
        let b = mg.insert(Entity::new_with_priority(EntityKind::Node, 0, pn));
        let el = build::ghost_element(&mut mg, 0, vec![a, b], pe);
        dir.bind_global(a, gid(10)).unwrap();
        dir.bind_global(b, gid(20)).unwrap();
        dir.bind_global(el, gid(100)).unwrap();
        let other = 1 - me;
        let (rn, re) = if me == 0 {
            (Priority::Border, Priority::HGhost)
        } else {
            (Priority::Master, Priority::Master)
        };
        dir.set_replica(a, other, rn);
        dir.set_replica(b, other, rn);
        dir.set_replica(el, other, re);

        let refined = build::refine_segment(&mut mg, el).unwrap();
        let summary = identify_new_entities(&mut mg, &mut dir, &comm, 1).unwrap();
        (
            summary.escalated,
            dir.global_id(refined.mid_node).unwrap().get(),
            dir.remote_replicas(refined.mid_node).len(),
            dir.global_id(refined.corner_copies[0]).unwrap().get(),
        )
    });

    for o in &out {
        assert_eq!(o.0, 0, "nothing should escalate");
        assert_eq!(o.2, 1, "each side must learn the other's mid copy");
    }
    // one identity for the mid node, distinct from the corner-copy identity
    assert_eq!(out[0].1, out[1].1);
    assert_ne!(out[0].1, out[0].3);
}

#[test]
#[serial]
fn boundary_edges_identify_by_endpoint_keys() {
    // each rank independently creates its copy of the same boundary edge
    // between two already-identified nodes
    let out = spawn_ranks(2, |comm| {
        let me = comm.rank();
        let mut mg = Multigrid::new();
        let mut dir = Directory::new(me, 2);
        let (pa, pb) = if me == 0 {
            (Priority::Master, Priority::Border)
        } else {
            (Priority::Border, Priority::Master)
        };
        let a = mg.insert(Entity::new_with_priority(EntityKind::Node, 0, pa));
        let b = mg.insert(Entity::new_with_priority(EntityKind::Node, 0, pb));
        dir.bind_global(a, gid(10)).unwrap();
        dir.bind_global(b, gid(20)).unwrap();
        dir.set_replica(a, 1 - me, pb);
        dir.set_replica(b, 1 - me, pa);
        let mut edge = Entity::new(EntityKind::Edge, 0);
        edge.corners = vec![a, b];
        let edge = mg.insert(edge);

        let summary = identify_new_entities(&mut mg, &mut dir, &comm, 0).unwrap();
        (
            summary.identified,
            dir.global_id(edge).unwrap().get(),
            dir.remote_replicas(edge).len(),
        )
    });

    for o in &out {
        assert!(o.0 >= 1);
        assert_eq!(o.2, 1, "each side sees the other's edge copy");
    }
    assert_eq!(out[0].1, out[1].1);
}

#[test]
#[serial]
fn shared_corner_copies_converge_to_one_master() {
    let out = spawn_ranks(2, |comm| {
        let me = comm.rank();
        let mut mg = Multigrid::new();
        let mut dir = Directory::new(me, 2);
        let ifaces = declare_standard_interfaces(&mut dir);
        let own = seed_rank(&mut mg, &mut dir, me);

        let refined = build::refine_segment(&mut mg, own).unwrap();
        let summary = identify_new_entities(&mut mg, &mut dir, &comm, 1).unwrap();
        resolve_priorities(&mut mg, &mut dir, &comm, &ifaces, 1).unwrap();
        let violations = check(&mg, &dir, &comm, &ifaces).unwrap();

        // the level-1 copy of the shared node b is corner 1 on rank 0 and
        // corner 0 on rank 1
        let shared_copy = refined.corner_copies[1 - me];
        (
            summary.rounds,
            summary.escalated,
            dir.global_id(shared_copy).unwrap().get(),
            mg.get(shared_copy).unwrap().priority,
            dir.remote_replicas(shared_copy).len(),
            violations,
        )
    });

    for o in &out {
        assert_eq!(o.1, 0, "nothing should escalate");
        assert_eq!(o.4, 1, "each side sees the other's copy");
        assert_eq!(o.5, 0, "consistency check must pass");
    }
    // one identity, exactly one master between the two copies
    assert_eq!(out[0].2, out[1].2);
    let masters = out.iter().filter(|o| o.3 == Priority::Master).count();
    assert_eq!(masters, 1);
}
