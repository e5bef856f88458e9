//! Thin façade over collective message passing between ranks.
//!
//! The core only needs a handful of collectives: reductions for the
//! refinement stopping rule, variable-count all-gathers for ghost data and
//! refinement decisions, and a barrier around timed regions. Every rank must
//! issue the same collectives in the same order.
//!
//! Backends:
//! - [`NoComm`]: single rank, every collective is the identity.
//! - [`LocalComm`]: several ranks as threads of one process, exchanging
//!   contiguous byte payloads through a process-wide mailbox.
//! - `MpiComm` (feature `mpi-support`): MPI world communicator.

use crate::mhd_error::MhdError;
use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

/// Collective communication interface (minimal by design).
pub trait Communicator {
    /// This rank's index in `0..size()`.
    fn rank(&self) -> usize;
    /// Number of ranks taking part in collectives.
    fn size(&self) -> usize;
    /// Block until every rank has reached the barrier.
    fn barrier(&self);
    /// Global sum of one value per rank.
    fn allreduce_sum(&self, local: f64) -> f64;
    /// Global maximum of one value per rank.
    fn allreduce_max(&self, local: f64) -> f64;
    /// Concatenate every rank's slice in rank order.
    fn allgather_f64(&self, local: &[f64]) -> Vec<f64>;
    /// Concatenate every rank's slice in rank order.
    fn allgather_u64(&self, local: &[u64]) -> Vec<u64>;

    fn is_root(&self) -> bool {
        self.rank() == 0
    }

    /// Global sum of a count.
    fn allreduce_sum_usize(&self, local: usize) -> usize {
        self.allgather_u64(&[local as u64]).iter().sum::<u64>() as usize
    }

    /// Agree on a local outcome: if any rank failed, every rank returns an
    /// error (its own, or [`MhdError::RemoteFailure`] naming the first failed
    /// rank). Collective.
    fn agree<T>(&self, local: Result<T, MhdError>) -> Result<T, MhdError>
    where
        Self: Sized,
    {
        let flags = self.allgather_u64(&[u64::from(local.is_err())]);
        match local {
            Err(e) => Err(e),
            Ok(value) => match flags.iter().position(|&f| f != 0) {
                Some(rank) => Err(MhdError::RemoteFailure { rank }),
                None => Ok(value),
            },
        }
    }
}

/// Compile-time no-op comm for serial runs and unit tests.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn barrier(&self) {}
    fn allreduce_sum(&self, local: f64) -> f64 {
        local
    }
    fn allreduce_max(&self, local: f64) -> f64 {
        local
    }
    fn allgather_f64(&self, local: &[f64]) -> Vec<f64> {
        local.to_vec()
    }
    fn allgather_u64(&self, local: &[u64]) -> Vec<u64> {
        local.to_vec()
    }
}

// --- LocalComm: ranks as threads of one process ---
type Key = (u64, usize, usize, u64); // (group, src, dst, seq)

static MAILBOX: Lazy<DashMap<Key, Bytes>> = Lazy::new(DashMap::new);
static NEXT_GROUP: AtomicU64 = AtomicU64::new(1);

/// One rank of an in-process communicator group.
///
/// Create all ranks at once with [`LocalComm::group`] and move each handle
/// into its own thread.
#[derive(Debug)]
pub struct LocalComm {
    group: u64,
    rank: usize,
    size: usize,
    seq: AtomicU64,
}

impl LocalComm {
    /// Create `size` connected ranks.
    pub fn group(size: usize) -> Vec<LocalComm> {
        let group = NEXT_GROUP.fetch_add(1, Relaxed);
        (0..size.max(1))
            .map(|rank| LocalComm {
                group,
                rank,
                size: size.max(1),
                seq: AtomicU64::new(0),
            })
            .collect()
    }

    /// Post `payload` to every peer and collect one payload per rank, in rank order.
    fn exchange(&self, payload: &[u8]) -> Vec<Bytes> {
        let seq = self.seq.fetch_add(1, Relaxed);
        let data = Bytes::copy_from_slice(payload);
        for peer in (0..self.size).filter(|&p| p != self.rank) {
            MAILBOX.insert((self.group, self.rank, peer, seq), data.clone());
        }
        (0..self.size)
            .map(|src| {
                if src == self.rank {
                    return data.clone();
                }
                let key = (self.group, src, self.rank, seq);
                loop {
                    if let Some((_, bytes)) = MAILBOX.remove(&key) {
                        break bytes;
                    }
                    std::thread::yield_now();
                }
            })
            .collect()
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }
    fn barrier(&self) {
        self.exchange(&[]);
    }
    fn allreduce_sum(&self, local: f64) -> f64 {
        // Rank-ordered summation so every rank sees bit-identical results.
        self.exchange(&local.to_ne_bytes())
            .iter()
            .flat_map(|b| bytemuck::pod_collect_to_vec::<u8, f64>(b))
            .sum()
    }
    fn allreduce_max(&self, local: f64) -> f64 {
        self.exchange(&local.to_ne_bytes())
            .iter()
            .flat_map(|b| bytemuck::pod_collect_to_vec::<u8, f64>(b))
            .fold(f64::NEG_INFINITY, f64::max)
    }
    fn allgather_f64(&self, local: &[f64]) -> Vec<f64> {
        self.exchange(bytemuck::cast_slice(local))
            .iter()
            .flat_map(|b| bytemuck::pod_collect_to_vec::<u8, f64>(b))
            .collect()
    }
    fn allgather_u64(&self, local: &[u64]) -> Vec<u64> {
        self.exchange(bytemuck::cast_slice(local))
            .iter()
            .flat_map(|b| bytemuck::pod_collect_to_vec::<u8, u64>(b))
            .collect()
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::Communicator;
    use mpi::collective::SystemOperation;
    use mpi::datatype::PartitionMut;
    use mpi::environment::Universe;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;
    use mpi::Count;

    /// World communicator; owns the MPI environment for the life of the run.
    pub struct MpiComm {
        world: SimpleCommunicator,
        _universe: Universe,
    }

    impl MpiComm {
        /// Initialise MPI. Returns `None` when MPI was already initialised.
        pub fn new() -> Option<Self> {
            let universe = mpi::initialize()?;
            let world = universe.world();
            Some(Self {
                world,
                _universe: universe,
            })
        }

        fn gather_varcount<T>(&self, local: &[T]) -> Vec<T>
        where
            T: Equivalence + Copy + Default,
        {
            let size = self.world.size() as usize;
            let mut counts: Vec<Count> = vec![0; size];
            self.world
                .all_gather_into(&(local.len() as Count), &mut counts[..]);
            let displs: Vec<Count> = counts
                .iter()
                .scan(0, |acc, &c| {
                    let d = *acc;
                    *acc += c;
                    Some(d)
                })
                .collect();
            let total: Count = counts.iter().sum();
            let mut out = vec![T::default(); total as usize];
            {
                let mut partition = PartitionMut::new(&mut out[..], &counts[..], &displs[..]);
                self.world.all_gather_varcount_into(local, &mut partition);
            }
            out
        }
    }

    impl Communicator for MpiComm {
        fn rank(&self) -> usize {
            self.world.rank() as usize
        }
        fn size(&self) -> usize {
            self.world.size() as usize
        }
        fn barrier(&self) {
            self.world.barrier();
        }
        fn allreduce_sum(&self, local: f64) -> f64 {
            let mut global = 0.0f64;
            self.world
                .all_reduce_into(&local, &mut global, SystemOperation::sum());
            global
        }
        fn allreduce_max(&self, local: f64) -> f64 {
            let mut global = 0.0f64;
            self.world
                .all_reduce_into(&local, &mut global, SystemOperation::max());
            global
        }
        fn allgather_f64(&self, local: &[f64]) -> Vec<f64> {
            self.gather_varcount(local)
        }
        fn allgather_u64(&self, local: &[u64]) -> Vec<u64> {
            self.gather_varcount(local)
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn no_comm_is_identity() {
        let comm = NoComm;
        assert_eq!(comm.allreduce_sum(2.5), 2.5);
        assert_eq!(comm.allgather_f64(&[1.0, 2.0]), vec![1.0, 2.0]);
        assert!(comm.is_root());
    }

    #[test]
    fn local_group_collectives_three_ranks() {
        let handles: Vec<_> = LocalComm::group(3)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let r = comm.rank() as f64;
                    let sum = comm.allreduce_sum(r + 1.0);
                    let max = comm.allreduce_max(r);
                    let local: Vec<f64> = (0..comm.rank()).map(|i| i as f64).collect();
                    let gathered = comm.allgather_f64(&local);
                    comm.barrier();
                    (sum, max, gathered)
                })
            })
            .collect();
        for h in handles {
            let (sum, max, gathered) = h.join().unwrap();
            assert_eq!(sum, 6.0);
            assert_eq!(max, 2.0);
            assert_eq!(gathered, vec![0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn gathered_words_keep_rank_order() {
        let handles: Vec<_> = LocalComm::group(3)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let r = comm.rank() as u64;
                    let ids = comm.allgather_u64(&[u64::MAX - r, r << 40]);
                    let vals = comm.allgather_f64(&[-(r as f64) - 0.5]);
                    (ids, vals)
                })
            })
            .collect();
        for h in handles {
            let (ids, vals) = h.join().unwrap();
            assert_eq!(
                ids,
                vec![u64::MAX, 0, u64::MAX - 1, 1 << 40, u64::MAX - 2, 2 << 40]
            );
            assert_eq!(vals, vec![-0.5, -1.5, -2.5]);
        }
    }

    #[test]
    fn agree_propagates_remote_failure() {
        let handles: Vec<_> = LocalComm::group(2)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let local = if comm.rank() == 1 {
                        Err(MhdError::Topology("boom".into()))
                    } else {
                        Ok(())
                    };
                    comm.agree(local)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results[0], Err(MhdError::RemoteFailure { rank: 1 }));
        assert_eq!(results[1], Err(MhdError::Topology("boom".into())));
    }
}
