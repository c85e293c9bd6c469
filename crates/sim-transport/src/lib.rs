//! Collective transport for a fixed-size worker group.
//!
//! Workers are OS threads; the two collectives the kernel needs (all-to-all
//! payload exchange and a global scalar minimum) run over a full mesh of
//! crossbeam channels. Each ordered rank pair gets a dedicated channel, so
//! per-pair FIFO delivery keeps successive rounds apart without round tags:
//! a peer cannot start round `k+1` before it has received our round-`k`
//! payload, and on a dedicated channel its round-`k` payload always arrives
//! before its round-`k+1` one.
//!
//! Payloads are opaque to this crate; the kernel serializes event buffers
//! itself and ships them as bytes.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::thread;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TransportError {
    /// A peer's end of the mesh hung up mid-collective. The group cannot
    /// make progress without it.
    #[error("worker {rank} lost its channel to rank {peer}")]
    PeerGone { rank: usize, peer: usize },
}

/// One worker's handle on the group mesh: a sender toward every rank and a
/// receiver from every rank (self included, which short-circuits through a
/// local channel).
pub struct Collective<T> {
    rank: usize,
    world_size: usize,
    txs: Vec<Sender<T>>,
    rxs: Vec<Receiver<T>>,
}

impl<T: Send> Collective<T> {
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// All-to-all exchange: sends `outbound[r]` to rank `r` and returns the
    /// payloads received from every rank, indexed by source. Blocks until
    /// one payload has arrived from each peer.
    pub fn alltoall(&self, outbound: Vec<T>) -> Result<Vec<T>, TransportError> {
        assert_eq!(
            outbound.len(),
            self.world_size,
            "alltoall payload count must equal world size"
        );
        for (peer, payload) in outbound.into_iter().enumerate() {
            self.txs[peer].send(payload).map_err(|_| TransportError::PeerGone {
                rank: self.rank,
                peer,
            })?;
        }
        (0..self.world_size)
            .map(|peer| {
                self.rxs[peer].recv().map_err(|_| TransportError::PeerGone {
                    rank: self.rank,
                    peer,
                })
            })
            .collect()
    }
}

impl<T: Send + Copy + Ord> Collective<T> {
    /// Global minimum over all workers. Every rank contributes `value` and
    /// every rank observes the same result.
    pub fn allreduce_min(&self, value: T) -> Result<T, TransportError> {
        let contributions = self.alltoall(vec![value; self.world_size])?;
        Ok(contributions
            .into_iter()
            .min()
            .expect("world size is at least one"))
    }
}

/// Build the channel mesh for a worker group, returning one [`Collective`]
/// per rank.
pub fn full_mesh<T: Send>(world_size: usize) -> Vec<Collective<T>> {
    assert!(world_size > 0, "worker group must have at least one rank");
    let mut txs_by_src: Vec<Vec<Sender<T>>> = (0..world_size).map(|_| Vec::with_capacity(world_size)).collect();
    let mut rxs_by_dst: Vec<Vec<Receiver<T>>> = (0..world_size).map(|_| Vec::with_capacity(world_size)).collect();
    for src in 0..world_size {
        for dst in 0..world_size {
            let (tx, rx) = unbounded();
            txs_by_src[src].push(tx);
            rxs_by_dst[dst].push(rx);
        }
    }
    txs_by_src
        .into_iter()
        .zip(rxs_by_dst)
        .enumerate()
        .map(|(rank, (txs, rxs))| Collective {
            rank,
            world_size,
            txs,
            rxs,
        })
        .collect()
}

/// The channel endpoints a single worker receives at spawn: an event-buffer
/// mesh (serialized bytes) and a clock mesh for the time reduction.
pub struct WorkerLinks {
    pub rank: usize,
    pub world_size: usize,
    pub events: Collective<Vec<u8>>,
    pub clocks: Collective<u64>,
}

/// Spawns one thread per rank, hands each its mesh endpoints, and joins.
pub struct WorkerGroup;

impl WorkerGroup {
    /// Run `f` on every rank of a fresh worker group and collect the
    /// results in rank order. A panicking worker re-raises on join.
    pub fn launch<R, F>(world_size: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(WorkerLinks) -> R + Send + Sync,
    {
        let event_meshes = full_mesh::<Vec<u8>>(world_size);
        let clock_meshes = full_mesh::<u64>(world_size);
        debug!(target: "transport", world_size, "launching worker group");
        thread::scope(|scope| {
            let handles: Vec<_> = event_meshes
                .into_iter()
                .zip(clock_meshes)
                .enumerate()
                .map(|(rank, (events, clocks))| {
                    let f = &f;
                    thread::Builder::new()
                        .name(format!("qnsim-worker-{rank}"))
                        .spawn_scoped(scope, move || {
                            f(WorkerLinks {
                                rank,
                                world_size,
                                events,
                                clocks,
                            })
                        })
                        .expect("spawn worker thread")
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alltoall_routes_by_rank() {
        let results = WorkerGroup::launch(3, |links| {
            let outbound: Vec<Vec<u8>> = (0..links.world_size)
                .map(|peer| vec![links.rank as u8, peer as u8])
                .collect();
            links.events.alltoall(outbound).unwrap()
        });
        for (rank, inbound) in results.into_iter().enumerate() {
            for (src, payload) in inbound.into_iter().enumerate() {
                assert_eq!(payload, vec![src as u8, rank as u8]);
            }
        }
    }

    #[test]
    fn allreduce_min_agrees_everywhere() {
        let results = WorkerGroup::launch(4, |links| {
            let value = [17u64, 5, 23, 11][links.rank];
            links.clocks.allreduce_min(value).unwrap()
        });
        assert_eq!(results, vec![5, 5, 5, 5]);
    }

    #[test]
    fn rounds_stay_separated_without_tags() {
        // Uneven per-rank work between rounds must not let one round's
        // payloads bleed into the next.
        let results = WorkerGroup::launch(3, |links| {
            let mut seen = Vec::new();
            for round in 0..10u64 {
                if links.rank == 0 {
                    std::thread::sleep(std::time::Duration::from_millis(1));
                }
                let outbound = vec![round; links.world_size];
                let inbound = links.clocks.alltoall(outbound).unwrap();
                seen.push(inbound);
            }
            seen
        });
        for per_rank in results {
            for (round, inbound) in per_rank.into_iter().enumerate() {
                assert_eq!(inbound, vec![round as u64; 3]);
            }
        }
    }

    #[test]
    fn single_rank_group_is_self_consistent() {
        let results = WorkerGroup::launch(1, |links| {
            let inbound = links.events.alltoall(vec![b"x".to_vec()]).unwrap();
            let min = links.clocks.allreduce_min(42).unwrap();
            (inbound, min)
        });
        assert_eq!(results[0].0, vec![b"x".to_vec()]);
        assert_eq!(results[0].1, 42);
    }
}
