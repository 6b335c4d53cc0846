//! MPI-based parallel communication module.
//!
//! This module provides an implementation of the `Comm` trait using the MPI (Message Passing Interface)
//! backend for distributed-memory parallelism. Collectives map one-to-one onto MPI collectives:
//! all-reduce, variable-count all-gather, and variable-count all-to-all. The implementation is only
//! available when the `mpi` feature is enabled.
//!
//! # Example
//! ```no_run
//! # #[cfg(feature = "mpi")] {
//! use std::sync::Arc;
//! use mulgrid::parallel::{Comm, MpiComm};
//! let comm: Arc<dyn Comm> = Arc::new(MpiComm::new());
//! println!("Rank: {} / {}", comm.rank(), comm.size());
//! comm.barrier();
//! # }
//! ```

use std::fmt;

use mpi::collective::SystemOperation;
use mpi::datatype::{Partition, PartitionMut};
use mpi::environment::Universe;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;
use mpi::Count;

/// MPI communicator wrapper for distributed parallelism.
///
/// Owns the MPI universe so that MPI stays initialized for the communicator's lifetime.
pub struct MpiComm {
    _universe: Universe,
    /// The MPI world communicator (all processes in the job).
    pub world: SimpleCommunicator,
    /// The rank (ID) of this process within the communicator.
    pub rank: usize,
    /// The total number of processes in the communicator.
    pub size: usize,
}

impl fmt::Debug for MpiComm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MpiComm(rank {} of {})", self.rank, self.size)
    }
}

impl MpiComm {
    /// Initializes MPI and constructs a new `MpiComm` instance.
    ///
    /// # Panics
    /// Panics if MPI initialization fails or MPI was already initialized.
    pub fn new() -> Self {
        let universe = mpi::initialize().expect("MPI initialization failed");
        let world = universe.world();
        let rank = world.rank() as usize;
        let size = world.size() as usize;
        MpiComm { _universe: universe, world, rank, size }
    }

    fn gather_varcount<T: Equivalence + Copy + Default>(&self, local: &[T]) -> Vec<Vec<T>> {
        let mut counts = vec![0 as Count; self.size];
        self.world.all_gather_into(&(local.len() as Count), &mut counts[..]);
        let displs = displacements(&counts);
        let total: usize = counts.iter().map(|&c| c as usize).sum();
        let mut buf = vec![T::default(); total];
        {
            let mut partition = PartitionMut::new(&mut buf[..], &counts[..], &displs[..]);
            self.world.all_gather_varcount_into(local, &mut partition);
        }
        split(&buf, &counts, &displs)
    }

    fn exchange_varcount<T: Equivalence + Copy + Default>(&self, send: Vec<Vec<T>>) -> Vec<Vec<T>> {
        assert_eq!(send.len(), self.size, "all_to_all: one buffer per rank");
        let send_counts: Vec<Count> = send.iter().map(|s| s.len() as Count).collect();
        let mut recv_counts = vec![0 as Count; self.size];
        self.world.all_to_all_into(&send_counts[..], &mut recv_counts[..]);
        let send_displs = displacements(&send_counts);
        let recv_displs = displacements(&recv_counts);
        let flat: Vec<T> = send.into_iter().flatten().collect();
        let total: usize = recv_counts.iter().map(|&c| c as usize).sum();
        let mut buf = vec![T::default(); total];
        {
            let outgoing = Partition::new(&flat[..], &send_counts[..], &send_displs[..]);
            let mut incoming = PartitionMut::new(&mut buf[..], &recv_counts[..], &recv_displs[..]);
            self.world.all_to_all_varcount_into(&outgoing, &mut incoming);
        }
        split(&buf, &recv_counts, &recv_displs)
    }
}

impl Default for MpiComm {
    fn default() -> Self {
        Self::new()
    }
}

fn displacements(counts: &[Count]) -> Vec<Count> {
    counts
        .iter()
        .scan(0 as Count, |acc, &c| {
            let d = *acc;
            *acc += c;
            Some(d)
        })
        .collect()
}

fn split<T: Copy>(buf: &[T], counts: &[Count], displs: &[Count]) -> Vec<Vec<T>> {
    counts
        .iter()
        .zip(displs)
        .map(|(&c, &d)| buf[d as usize..(d + c) as usize].to_vec())
        .collect()
}

impl super::Comm for MpiComm {
    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }
    fn barrier(&self) {
        self.world.barrier();
    }
    fn all_reduce_sum(&self, x: f64) -> f64 {
        let mut y = x;
        self.world.all_reduce_into(&x, &mut y, &SystemOperation::sum());
        y
    }
    fn all_reduce_max(&self, x: f64) -> f64 {
        let mut y = x;
        self.world.all_reduce_into(&x, &mut y, &SystemOperation::max());
        y
    }
    fn all_gather_usize(&self, local: &[usize]) -> Vec<Vec<usize>> {
        let wide: Vec<u64> = local.iter().map(|&v| v as u64).collect();
        self.gather_varcount(&wide)
            .into_iter()
            .map(|v| v.into_iter().map(|x| x as usize).collect())
            .collect()
    }
    fn all_gather_f64(&self, local: &[f64]) -> Vec<Vec<f64>> {
        self.gather_varcount(local)
    }
    fn all_to_all_usize(&self, send: Vec<Vec<usize>>) -> Vec<Vec<usize>> {
        let wide = send
            .into_iter()
            .map(|v| v.into_iter().map(|x| x as u64).collect())
            .collect();
        self.exchange_varcount::<u64>(wide)
            .into_iter()
            .map(|v| v.into_iter().map(|x| x as usize).collect())
            .collect()
    }
    fn all_to_all_f64(&self, send: Vec<Vec<f64>>) -> Vec<Vec<f64>> {
        self.exchange_varcount(send)
    }
}
