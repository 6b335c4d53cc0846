//! Distribution of global indices across ranks.
//!
//! A [`Map`] is a contiguous ordered partition of `0..N`: rank `r` owns
//! `offsets[r]..offsets[r + 1]`. Row, domain and range maps of every operator are `Map`s.
//! A [`ColumnMap`] describes the local column space of a filled matrix: the locally owned
//! slice of the domain map followed by the sorted ghost indices owned elsewhere.

use std::fmt;
use std::sync::Arc;

use super::Comm;
use crate::error::MgError;

#[derive(Clone)]
pub struct Map {
    comm: Arc<dyn Comm>,
    offsets: Vec<usize>,
}

impl fmt::Debug for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Map")
            .field("rank", &self.comm.rank())
            .field("offsets", &self.offsets)
            .finish()
    }
}

impl Map {
    /// Split `global_len` indices as evenly as possible, lower ranks taking the remainder.
    pub fn uniform(global_len: usize, comm: Arc<dyn Comm>) -> Self {
        let p = comm.size();
        let base = global_len / p;
        let extra = global_len % p;
        let mut offsets = Vec::with_capacity(p + 1);
        offsets.push(0);
        for r in 0..p {
            let len = base + usize::from(r < extra);
            offsets.push(offsets[r] + len);
        }
        Map { comm, offsets }
    }

    /// Collective: every rank contributes its local length.
    pub fn from_local_len(local_len: usize, comm: Arc<dyn Comm>) -> Self {
        let lens = comm.all_gather_usize(&[local_len]);
        let mut offsets = Vec::with_capacity(lens.len() + 1);
        offsets.push(0);
        for (r, l) in lens.iter().enumerate() {
            offsets.push(offsets[r] + l[0]);
        }
        Map { comm, offsets }
    }

    pub fn comm(&self) -> &Arc<dyn Comm> {
        &self.comm
    }

    pub fn global_len(&self) -> usize {
        *self.offsets.last().unwrap_or(&0)
    }

    pub fn local_len(&self) -> usize {
        let r = self.comm.rank();
        self.offsets[r + 1] - self.offsets[r]
    }

    /// First global index owned by this rank.
    pub fn min_global(&self) -> usize {
        self.offsets[self.comm.rank()]
    }

    /// Owned global range on rank `r`.
    pub fn range_of(&self, r: usize) -> std::ops::Range<usize> {
        self.offsets[r]..self.offsets[r + 1]
    }

    pub fn local_range(&self) -> std::ops::Range<usize> {
        self.range_of(self.comm.rank())
    }

    pub fn owner_of(&self, gid: usize) -> Result<usize, MgError> {
        if gid >= self.global_len() {
            return Err(MgError::OutOfRange { index: gid, bound: self.global_len() });
        }
        // last offset <= gid; empty ranks share offsets, partition_point skips them
        Ok(self.offsets.partition_point(|&o| o <= gid) - 1)
    }

    pub fn is_local(&self, gid: usize) -> bool {
        self.local_range().contains(&gid)
    }

    pub fn global_to_local(&self, gid: usize) -> Option<usize> {
        if self.is_local(gid) { Some(gid - self.min_global()) } else { None }
    }

    pub fn local_to_global(&self, lid: usize) -> Result<usize, MgError> {
        if lid >= self.local_len() {
            return Err(MgError::OutOfRange { index: lid, bound: self.local_len() });
        }
        Ok(self.min_global() + lid)
    }

    /// Same partition over the same number of ranks.
    pub fn is_same_as(&self, other: &Map) -> bool {
        self.offsets == other.offsets
    }
}

/// Local column space of a filled matrix.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    owned: std::ops::Range<usize>,
    ghosts: Vec<usize>,
}

impl ColumnMap {
    /// `ghosts` must be sorted, unique, and disjoint from `owned`.
    pub fn new(owned: std::ops::Range<usize>, ghosts: Vec<usize>) -> Self {
        debug_assert!(ghosts.windows(2).all(|w| w[0] < w[1]));
        debug_assert!(ghosts.iter().all(|g| !owned.contains(g)));
        ColumnMap { owned, ghosts }
    }

    pub fn n_owned(&self) -> usize {
        self.owned.len()
    }

    pub fn len(&self) -> usize {
        self.owned.len() + self.ghosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ghosts(&self) -> &[usize] {
        &self.ghosts
    }

    pub fn global_to_local(&self, gid: usize) -> Option<usize> {
        if self.owned.contains(&gid) {
            return Some(gid - self.owned.start);
        }
        self.ghosts
            .binary_search(&gid)
            .ok()
            .map(|p| self.owned.len() + p)
    }

    pub fn local_to_global(&self, lid: usize) -> usize {
        if lid < self.owned.len() {
            self.owned.start + lid
        } else {
            self.ghosts[lid - self.owned.len()]
        }
    }
}
