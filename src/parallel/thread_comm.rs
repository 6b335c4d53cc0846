//! In-process multi-rank communicator.
//!
//! `ThreadComm::run(p, f)` executes `f` on `p` scoped threads, each holding a communicator
//! for one rank. Collectives rendezvous on a shared barrier: every rank deposits its
//! contribution in a slot table, waits, reads what it needs, and waits again before the
//! slots may be reused. This gives lock-step semantics identical to a blocking MPI
//! collective, so distributed code paths can be tested with `cargo test`.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Barrier, Mutex};

use super::Comm;

struct Exchange {
    barrier: Barrier,
    slots: Mutex<Vec<Option<Box<dyn Any + Send>>>>,
}

/// One rank of a thread group.
pub struct ThreadComm {
    rank: usize,
    size: usize,
    shared: Arc<Exchange>,
}

impl fmt::Debug for ThreadComm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadComm")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

impl ThreadComm {
    /// Run `f` on `size` ranks and return the per-rank results in rank order.
    ///
    /// # Panics
    /// Panics if any rank panics; the remaining ranks cannot make progress past the
    /// next collective, which mirrors an aborted parallel job.
    pub fn run<R, F>(size: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(Arc<dyn Comm>) -> R + Sync,
    {
        assert!(size > 0, "ThreadComm::run needs at least one rank");
        let shared = Arc::new(Exchange {
            barrier: Barrier::new(size),
            slots: Mutex::new((0..size).map(|_| None).collect()),
        });
        std::thread::scope(|s| {
            let handles: Vec<_> = (0..size)
                .map(|rank| {
                    let comm: Arc<dyn Comm> = Arc::new(ThreadComm {
                        rank,
                        size,
                        shared: Arc::clone(&shared),
                    });
                    let f = &f;
                    s.spawn(move || f(comm))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("ThreadComm: a rank panicked"))
                .collect()
        })
    }

    /// Deposit `value`, then let `read` inspect every rank's deposit in rank order.
    fn exchange<T, U, F>(&self, value: T, read: F) -> U
    where
        T: Send + 'static,
        F: FnOnce(Vec<&T>) -> U,
    {
        {
            let mut slots = self.shared.slots.lock().expect("ThreadComm: poisoned slot table");
            slots[self.rank] = Some(Box::new(value));
        }
        self.shared.barrier.wait();
        let out = {
            let slots = self.shared.slots.lock().expect("ThreadComm: poisoned slot table");
            let views: Vec<&T> = slots
                .iter()
                .map(|s| {
                    s.as_ref()
                        .and_then(|b| b.downcast_ref::<T>())
                        .expect("ThreadComm: ranks entered different collectives")
                })
                .collect();
            read(views)
        };
        self.shared.barrier.wait();
        out
    }
}

impl Comm for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }
    fn barrier(&self) {
        self.shared.barrier.wait();
    }
    fn all_reduce_sum(&self, x: f64) -> f64 {
        self.exchange(x, |all| all.into_iter().fold(0.0, |acc, v| acc + *v))
    }
    fn all_reduce_max(&self, x: f64) -> f64 {
        self.exchange(x, |all| all.into_iter().fold(f64::NEG_INFINITY, |acc, v| acc.max(*v)))
    }
    fn all_gather_usize(&self, local: &[usize]) -> Vec<Vec<usize>> {
        self.exchange(local.to_vec(), |all| all.into_iter().cloned().collect())
    }
    fn all_gather_f64(&self, local: &[f64]) -> Vec<Vec<f64>> {
        self.exchange(local.to_vec(), |all| all.into_iter().cloned().collect())
    }
    fn all_to_all_usize(&self, send: Vec<Vec<usize>>) -> Vec<Vec<usize>> {
        assert_eq!(send.len(), self.size, "all_to_all: one buffer per rank");
        let me = self.rank;
        self.exchange(send, |all| all.into_iter().map(|s| s[me].clone()).collect())
    }
    fn all_to_all_f64(&self, send: Vec<Vec<f64>>) -> Vec<Vec<f64>> {
        assert_eq!(send.len(), self.size, "all_to_all: one buffer per rank");
        let me = self.rank;
        self.exchange(send, |all| all.into_iter().map(|s| s[me].clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_reduce_over_four_ranks() {
        let sums = ThreadComm::run(4, |comm| comm.all_reduce_sum(comm.rank() as f64 + 1.0));
        assert_eq!(sums, vec![10.0; 4]);
    }

    #[test]
    fn all_to_all_routes_by_destination() {
        let got = ThreadComm::run(3, |comm| {
            let me = comm.rank();
            let send = (0..comm.size()).map(|dst| vec![me * 10 + dst]).collect();
            comm.all_to_all_usize(send)
        });
        // rank 1 receives [0*10+1], [1*10+1], [2*10+1]
        assert_eq!(got[1], vec![vec![1], vec![11], vec![21]]);
    }

    #[test]
    fn repeated_collectives_stay_in_lockstep() {
        let out = ThreadComm::run(3, |comm| {
            let mut acc = 0usize;
            for k in 0..50 {
                acc += comm.all_reduce_sum_usize(k + comm.rank());
            }
            acc
        });
        assert!(out.iter().all(|&v| v == out[0]));
    }
}
