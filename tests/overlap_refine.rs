//! One rank refines the element on a partition boundary; the overlap update
//! must replicate the boundary son (and only it) to the neighbor rank, link it
//! under the ghost father, and be a no-op when run again.

use mesh_replica::directory::comm::spawn_ranks;
use mesh_replica::grid::build;
use mesh_replica::prelude::*;
use serial_test::serial;

fn gid(raw: u64) -> GlobalId {
    GlobalId::new(raw).unwrap()
}

fn seed_rank(mg: &mut Multigrid, dir: &mut Directory, me: usize) -> (EntityId, EntityId) {
    let node = |mg: &mut Multigrid, p| mg.insert(Entity::new_with_priority(EntityKind::Node, 0, p));
    let (pa, pb, pc) = if me == 0 {
        (Priority::Master, Priority::Master, Priority::HGhost)
    } else {
        (Priority::HGhost, Priority::Border, Priority::Master)
    };
    let a = node(mg, pa);
    let b = node(mg, pb);
    let c = node(mg, pc);
    let (pe0, pe1) = if me == 0 {
        (Priority::Master, Priority::HGhost)
    } else {
        (Priority::HGhost, Priority::Master)
    };
    let e0 = build::ghost_element(mg, 0, vec![a, b], pe0);
    let e1 = build::ghost_element(mg, 0, vec![b, c], pe1);
    for (h, g) in [(a, 10), (b, 20), (c, 30), (e0, 100), (e1, 101)] {
        dir.bind_global(h, gid(g)).unwrap();
    }
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
    (e0, e1)
}

#[test]
#[serial]
fn boundary_son_is_replicated_and_linked_once() {
    let out = spawn_ranks(2, |comm| {
        let me = comm.rank();
        let mut mg = Multigrid::new();
        let mut dir = Directory::new(me, 2);
        let (e0, _e1) = seed_rank(&mut mg, &mut dir, me);

        if me == 0 {
            build::refine_segment(&mut mg, e0).unwrap();
        }
        identify_new_entities(&mut mg, &mut dir, &comm, 1).unwrap();

        let first = update_overlap(&mut mg, &mut dir, &comm, 0).unwrap();
        let second = update_overlap(&mut mg, &mut dir, &comm, 0).unwrap();

        let fine_ghosts: Vec<EntityId> = mg
            .ids_at(1, EntityKind::Element)
            .into_iter()
            .filter(|&e| mg.get(e).unwrap().priority.is_ghost())
            .collect();
        let linked = fine_ghosts
            .iter()
            .all(|&g| mg.get(g).unwrap().father.is_some());
        (first.sent, first.arrived, second.sent, second.pruned, fine_ghosts.len(), linked)
    });

    // rank 0 sent exactly the son touching the shared node, and only once
    assert_eq!(out[0].0, 1);
    assert_eq!(out[0].2, 0);
    // rank 1 received it, linked it under its ghost of E0, and kept it
    assert!(out[1].1 >= 1);
    assert_eq!(out[1].4, 1);
    assert!(out[1].5, "overlap ghost must hang under the ghost father");
    assert_eq!(out[1].3, 0, "second pass must not prune the justified ghost");
}
