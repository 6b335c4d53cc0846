//! Process-level communication and index distribution.
//!
//! Every distributed object in the crate carries an `Arc<dyn Comm>` through its [`Map`].
//! Collectives are blocking and must be entered by every rank in the same order; a rank
//! that disappears mid-collective is a fatal condition and the backends panic rather than
//! attempt recovery.
//!
//! Backends:
//! - [`SerialComm`]: a single process.
//! - [`ThreadComm`]: `p` ranks as scoped threads inside one process, used to exercise
//!   distributed code paths without an MPI launcher.
//! - `MpiComm` (feature `mpi`): the MPI world communicator.
//!
//! Intra-process loops over rows go through [`par_map_rows`] / [`par_for_each_row`],
//! which use rayon when the `rayon` feature is enabled and fall back to sequential
//! iteration otherwise. Both write one output slot per row, so results do not depend
//! on scheduling.

use std::fmt;

pub mod import;
pub mod map;
pub mod thread_comm;

#[cfg(feature = "mpi")]
pub mod mpi_comm;
#[cfg(feature = "mpi")]
pub use mpi_comm::MpiComm;

pub use import::Importer;
pub use map::{ColumnMap, Map};
pub use thread_comm::ThreadComm;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Blocking collective operations over a fixed group of ranks.
pub trait Comm: Send + Sync + fmt::Debug {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn barrier(&self);

    /// Sum `x` over all ranks. The reduction order is rank order.
    fn all_reduce_sum(&self, x: f64) -> f64;
    fn all_reduce_max(&self, x: f64) -> f64;

    /// Every rank receives every rank's slice, indexed by source rank.
    fn all_gather_usize(&self, local: &[usize]) -> Vec<Vec<usize>>;
    fn all_gather_f64(&self, local: &[f64]) -> Vec<Vec<f64>>;

    /// Sparse personalized exchange: `send[r]` goes to rank `r`; the result holds, for
    /// every source rank `r`, what `r` sent to this rank.
    fn all_to_all_usize(&self, send: Vec<Vec<usize>>) -> Vec<Vec<usize>>;
    fn all_to_all_f64(&self, send: Vec<Vec<f64>>) -> Vec<Vec<f64>>;

    fn all_reduce_sum_usize(&self, x: usize) -> usize {
        self.all_gather_usize(&[x]).iter().map(|v| v[0]).sum()
    }

    fn all_reduce_max_usize(&self, x: usize) -> usize {
        self.all_gather_usize(&[x])
            .iter()
            .map(|v| v[0])
            .max()
            .unwrap_or(0)
    }

    fn all_reduce_min_usize(&self, x: usize) -> usize {
        self.all_gather_usize(&[x])
            .iter()
            .map(|v| v[0])
            .min()
            .unwrap_or(0)
    }

    fn dot(&self, a: &[f64], b: &[f64]) -> f64 {
        self.all_reduce_sum(local_dot(a, b))
    }
}

/// Single-process communicator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialComm;

impl SerialComm {
    pub fn new() -> Self {
        SerialComm
    }
}

impl Comm for SerialComm {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn barrier(&self) {}
    fn all_reduce_sum(&self, x: f64) -> f64 {
        x
    }
    fn all_reduce_max(&self, x: f64) -> f64 {
        x
    }
    fn all_gather_usize(&self, local: &[usize]) -> Vec<Vec<usize>> {
        vec![local.to_vec()]
    }
    fn all_gather_f64(&self, local: &[f64]) -> Vec<Vec<f64>> {
        vec![local.to_vec()]
    }
    fn all_to_all_usize(&self, send: Vec<Vec<usize>>) -> Vec<Vec<usize>> {
        send
    }
    fn all_to_all_f64(&self, send: Vec<Vec<f64>>) -> Vec<Vec<f64>> {
        send
    }
}

/// Chunk length used for order-stable partial sums.
const REDUCE_CHUNK: usize = 1024;

/// Local dot product, summed chunk by chunk in a fixed order.
pub fn local_dot(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len(), "local_dot: length mismatch");
    #[cfg(feature = "rayon")]
    {
        let partials: Vec<f64> = a
            .par_chunks(REDUCE_CHUNK)
            .zip(b.par_chunks(REDUCE_CHUNK))
            .map(|(x, y)| x.iter().zip(y).map(|(p, q)| p * q).sum::<f64>())
            .collect();
        partials.iter().sum()
    }
    #[cfg(not(feature = "rayon"))]
    {
        a.chunks(REDUCE_CHUNK)
            .zip(b.chunks(REDUCE_CHUNK))
            .map(|(x, y)| x.iter().zip(y).map(|(p, q)| p * q).sum::<f64>())
            .sum()
    }
}

/// Evaluate `f` for every row index in `0..n`, collecting results in row order.
pub fn par_map_rows<R, F>(n: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(usize) -> R + Sync + Send,
{
    #[cfg(feature = "rayon")]
    {
        (0..n).into_par_iter().map(f).collect()
    }
    #[cfg(not(feature = "rayon"))]
    {
        (0..n).map(f).collect()
    }
}

/// Overwrite `out[i]` with `f(i)` for every row.
pub fn par_for_each_row<F>(out: &mut [f64], f: F)
where
    F: Fn(usize) -> f64 + Sync + Send,
{
    #[cfg(feature = "rayon")]
    {
        out.par_iter_mut().enumerate().for_each(|(i, o)| *o = f(i));
    }
    #[cfg(not(feature = "rayon"))]
    {
        out.iter_mut().enumerate().for_each(|(i, o)| *o = f(i));
    }
}

/// Size the global rayon pool to the machine; harmless if a pool already exists.
#[cfg(feature = "rayon")]
pub fn init_thread_pool() {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_cpus::get())
        .build_global()
        .ok();
}
