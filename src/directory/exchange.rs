//! Symmetric count-then-payload record exchange over a [`Communicator`].
//!
//! Every collective phase in this crate is built on the same discipline:
//! post all receives, post all sends, wait on every receive, and always drain
//! every pending send before returning, even when an error was seen, so no
//! handle outlives its buffer.

use crate::directory::comm::{Communicator, Wait};
use crate::directory::wire::WireCount;
use crate::replica_error::MeshReplicaError;
use bytemuck::{Pod, Zeroable};
use std::collections::HashMap;

/// Exchange fixed-size POD records with every peer rank.
///
/// `outgoing` maps peer rank to the records destined for it; peers absent from
/// the map receive an empty batch (a send is always posted so the phase stays
/// collective). Returns the records received per peer.
pub fn exchange_records<T, C>(
    comm: &C,
    base_tag: u16,
    outgoing: &HashMap<usize, Vec<T>>,
) -> Result<HashMap<usize, Vec<T>>, MeshReplicaError>
where
    T: Pod + Zeroable + Copy,
    C: Communicator,
{
    if comm.is_no_comm() || comm.size() <= 1 {
        return Ok(HashMap::new());
    }
    let my_rank = comm.rank();
    let peers: Vec<usize> = (0..comm.size()).filter(|&r| r != my_rank).collect();

    let mut pending_sends: Vec<C::SendHandle> = Vec::new();
    let mut maybe_err: Option<MeshReplicaError> = None;

    // --- Phase 1: exchange counts ---------------------------------------
    let mut size_recvs: Vec<(usize, C::RecvHandle)> = Vec::with_capacity(peers.len());
    for &peer in &peers {
        let mut cnt = WireCount::zeroed();
        let h = comm.irecv(
            peer,
            base_tag,
            bytemuck::cast_slice_mut(std::slice::from_mut(&mut cnt)),
        );
        size_recvs.push((peer, h));
    }
    for &peer in &peers {
        let cnt = WireCount::new(outgoing.get(&peer).map(|v| v.len()).unwrap_or(0));
        pending_sends.push(comm.isend(
            peer,
            base_tag,
            bytemuck::cast_slice(std::slice::from_ref(&cnt)),
        ));
    }
    let mut sizes_in: HashMap<usize, usize> = HashMap::new();
    for (peer, h) in size_recvs {
        match h.wait() {
            Some(data) if data.len() == std::mem::size_of::<WireCount>() => {
                let mut cnt = WireCount::zeroed();
                bytemuck::cast_slice_mut(std::slice::from_mut(&mut cnt)).copy_from_slice(&data);
                sizes_in.insert(peer, cnt.get());
            }
            Some(data) => {
                maybe_err.get_or_insert_with(|| {
                    MeshReplicaError::comm(
                        peer,
                        format!(
                            "expected {} bytes for count, got {}",
                            std::mem::size_of::<WireCount>(),
                            data.len()
                        ),
                    )
                });
            }
            None => {
                maybe_err
                    .get_or_insert_with(|| MeshReplicaError::comm(peer, "failed to recv count"));
            }
        }
    }

    // --- Phase 2: exchange payloads --------------------------------------
    let mut data_recvs: Vec<(usize, C::RecvHandle, Vec<T>)> = Vec::with_capacity(peers.len());
    for &peer in &peers {
        let n = *sizes_in.get(&peer).unwrap_or(&0);
        let mut buffer = vec![T::zeroed(); n];
        let h = comm.irecv(peer, base_tag + 1, bytemuck::cast_slice_mut(buffer.as_mut_slice()));
        data_recvs.push((peer, h, buffer));
    }
    for &peer in &peers {
        let empty: Vec<T> = Vec::new();
        let records = outgoing.get(&peer).unwrap_or(&empty);
        // always post a send, even if empty
        pending_sends.push(comm.isend(peer, base_tag + 1, bytemuck::cast_slice(records)));
    }

    let mut incoming: HashMap<usize, Vec<T>> = HashMap::new();
    for (peer, h, mut buffer) in data_recvs {
        match h.wait() {
            Some(raw) if raw.len() == buffer.len() * std::mem::size_of::<T>() => {
                if !buffer.is_empty() {
                    bytemuck::cast_slice_mut(buffer.as_mut_slice()).copy_from_slice(&raw);
                }
                incoming.insert(peer, buffer);
            }
            Some(raw) => {
                maybe_err.get_or_insert_with(|| {
                    MeshReplicaError::comm(
                        peer,
                        format!(
                            "expected {} bytes for records, got {}",
                            buffer.len() * std::mem::size_of::<T>(),
                            raw.len()
                        ),
                    )
                });
            }
            None => {
                maybe_err
                    .get_or_insert_with(|| MeshReplicaError::comm(peer, "failed to recv records"));
            }
        }
    }

    // always drain all sends
    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(incoming),
    }
}

/// Logical-OR reduction of one flag across all ranks.
///
/// Used as the convergence vote after each identification round: the loop
/// terminates when no rank introduced a new request.
pub fn or_reduce_flag<C: Communicator>(
    comm: &C,
    tag: u16,
    mine: bool,
) -> Result<bool, MeshReplicaError> {
    use crate::directory::wire::WireFlag;

    if comm.is_no_comm() || comm.size() <= 1 {
        return Ok(mine);
    }
    let my_rank = comm.rank();
    let peers: Vec<usize> = (0..comm.size()).filter(|&r| r != my_rank).collect();

    let mut recvs = Vec::with_capacity(peers.len());
    let mut buffers = vec![WireFlag::zeroed(); peers.len()];
    for (i, &peer) in peers.iter().enumerate() {
        let h = comm.irecv(
            peer,
            tag,
            bytemuck::cast_slice_mut(std::slice::from_mut(&mut buffers[i])),
        );
        recvs.push((peer, h));
    }
    let flag = WireFlag::new(mine);
    let mut pending = Vec::with_capacity(peers.len());
    for &peer in &peers {
        pending.push(comm.isend(peer, tag, bytemuck::cast_slice(std::slice::from_ref(&flag))));
    }

    let mut acc = mine;
    let mut maybe_err: Option<MeshReplicaError> = None;
    for (peer, h) in recvs {
        match h.wait() {
            Some(data) if data.len() == std::mem::size_of::<WireFlag>() => {
                let mut f = WireFlag::zeroed();
                bytemuck::cast_slice_mut(std::slice::from_mut(&mut f)).copy_from_slice(&data);
                acc |= f.get();
            }
            _ => {
                maybe_err
                    .get_or_insert_with(|| MeshReplicaError::comm(peer, "failed to recv flag"));
            }
        }
    }
    for send in pending {
        let _ = send.wait();
    }
    match maybe_err {
        Some(err) => Err(err),
        None => Ok(acc),
    }
}

/// Max reduction of one `u32` across all ranks.
///
/// Collective per-level sweeps (restriction, overlap) need every rank to walk
/// the same number of levels even when their local grids are shallower.
pub fn max_reduce_u32<C: Communicator>(
    comm: &C,
    tag: u16,
    mine: u32,
) -> Result<u32, MeshReplicaError> {
    if comm.is_no_comm() || comm.size() <= 1 {
        return Ok(mine);
    }
    let my_rank = comm.rank();
    let peers: Vec<usize> = (0..comm.size()).filter(|&r| r != my_rank).collect();

    let mut recvs = Vec::with_capacity(peers.len());
    let mut buffers = vec![WireCount::zeroed(); peers.len()];
    for (i, &peer) in peers.iter().enumerate() {
        let h = comm.irecv(
            peer,
            tag,
            bytemuck::cast_slice_mut(std::slice::from_mut(&mut buffers[i])),
        );
        recvs.push((peer, h));
    }
    let val = WireCount::new(mine as usize);
    let mut pending = Vec::with_capacity(peers.len());
    for &peer in &peers {
        pending.push(comm.isend(peer, tag, bytemuck::cast_slice(std::slice::from_ref(&val))));
    }

    let mut acc = mine;
    let mut maybe_err: Option<MeshReplicaError> = None;
    for (peer, h) in recvs {
        match h.wait() {
            Some(data) if data.len() == std::mem::size_of::<WireCount>() => {
                let mut c = WireCount::zeroed();
                bytemuck::cast_slice_mut(std::slice::from_mut(&mut c)).copy_from_slice(&data);
                acc = acc.max(c.get() as u32);
            }
            _ => {
                maybe_err
                    .get_or_insert_with(|| MeshReplicaError::comm(peer, "failed to recv max"));
            }
        }
    }
    for send in pending {
        let _ = send.wait();
    }
    match maybe_err {
        Some(err) => Err(err),
        None => Ok(acc),
    }
}
