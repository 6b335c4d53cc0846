//! Distributed vectors and multivectors.
//!
//! A [`DistVector`] owns the locally stored entries of a vector distributed according to a
//! [`Map`]; global reductions (dot products, norms) go through the map's communicator and
//! are therefore collective. A [`MultiVector`] stores several such columns as a local
//! `faer::Mat` block and is used for nullspace candidates and node coordinates.

use std::sync::Arc;

use faer::Mat;

use crate::error::MgError;
use crate::parallel::{Map, local_dot};

#[derive(Debug, Clone)]
pub struct DistVector {
    map: Arc<Map>,
    data: Vec<f64>,
}

impl DistVector {
    pub fn zeros(map: Arc<Map>) -> Self {
        let n = map.local_len();
        DistVector { map, data: vec![0.0; n] }
    }

    pub fn from_local(map: Arc<Map>, data: Vec<f64>) -> Result<Self, MgError> {
        if data.len() != map.local_len() {
            return Err(MgError::dim(format!(
                "vector has {} local entries, map owns {}",
                data.len(),
                map.local_len()
            )));
        }
        Ok(DistVector { map, data })
    }

    /// Fill each owned entry from its global index.
    pub fn from_global_fn(map: Arc<Map>, f: impl Fn(usize) -> f64) -> Self {
        let data = map.local_range().map(f).collect();
        DistVector { map, data }
    }

    pub fn map(&self) -> &Arc<Map> {
        &self.map
    }

    pub fn local(&self) -> &[f64] {
        &self.data
    }

    pub fn local_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_local(self) -> Vec<f64> {
        self.data
    }

    pub fn local_len(&self) -> usize {
        self.data.len()
    }

    pub fn global_len(&self) -> usize {
        self.map.global_len()
    }

    /// Collective.
    pub fn dot(&self, other: &DistVector) -> f64 {
        self.map.comm().all_reduce_sum(local_dot(&self.data, &other.data))
    }

    /// Collective.
    pub fn norm2(&self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Collective.
    pub fn norm_inf(&self) -> f64 {
        let local = self.data.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        self.map.comm().all_reduce_max(local)
    }

    pub fn fill(&mut self, v: f64) {
        self.data.iter_mut().for_each(|x| *x = v);
    }

    pub fn scale(&mut self, alpha: f64) {
        self.data.iter_mut().for_each(|x| *x *= alpha);
    }

    /// self ← self + α·x
    pub fn axpy(&mut self, alpha: f64, x: &DistVector) {
        debug_assert_eq!(self.data.len(), x.data.len());
        for (s, v) in self.data.iter_mut().zip(&x.data) {
            *s += alpha * v;
        }
    }

    /// self ← α·x + β·self
    pub fn update(&mut self, alpha: f64, x: &DistVector, beta: f64) {
        debug_assert_eq!(self.data.len(), x.data.len());
        for (s, v) in self.data.iter_mut().zip(&x.data) {
            *s = alpha * v + beta * *s;
        }
    }

    pub fn copy_from(&mut self, x: &DistVector) {
        self.data.copy_from_slice(&x.data);
    }

    pub(crate) fn check_map(&self, map: &Map, what: &str) -> Result<(), MgError> {
        if self.map.is_same_as(map) {
            Ok(())
        } else {
            Err(MgError::dim(format!("{what}: vector map does not match operator map")))
        }
    }
}

impl AsRef<[f64]> for DistVector {
    fn as_ref(&self) -> &[f64] {
        &self.data
    }
}

impl AsMut<[f64]> for DistVector {
    fn as_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }
}

/// A set of distributed column vectors sharing one map.
#[derive(Debug, Clone)]
pub struct MultiVector {
    map: Arc<Map>,
    data: Mat<f64>,
}

impl MultiVector {
    pub fn zeros(map: Arc<Map>, num_vectors: usize) -> Self {
        let n = map.local_len();
        MultiVector { map, data: Mat::zeros(n, num_vectors) }
    }

    /// Entry `(i, j)` is `f(global index of row i, j)`.
    pub fn from_global_fn(map: Arc<Map>, num_vectors: usize, f: impl Fn(usize, usize) -> f64) -> Self {
        let start = map.min_global();
        let n = map.local_len();
        let data = Mat::from_fn(n, num_vectors, |i, j| f(start + i, j));
        MultiVector { map, data }
    }

    pub fn from_local(map: Arc<Map>, data: Mat<f64>) -> Result<Self, MgError> {
        if data.nrows() != map.local_len() {
            return Err(MgError::dim(format!(
                "multivector has {} local rows, map owns {}",
                data.nrows(),
                map.local_len()
            )));
        }
        Ok(MultiVector { map, data })
    }

    pub fn map(&self) -> &Arc<Map> {
        &self.map
    }

    pub fn num_vectors(&self) -> usize {
        self.data.ncols()
    }

    pub fn local_len(&self) -> usize {
        self.data.nrows()
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[(i, j)]
    }

    pub fn set(&mut self, i: usize, j: usize, v: f64) {
        self.data[(i, j)] = v;
    }

    pub fn local(&self) -> &Mat<f64> {
        &self.data
    }

    /// Copy column `j` into a standalone vector.
    pub fn column(&self, j: usize) -> DistVector {
        let data = (0..self.data.nrows()).map(|i| self.data[(i, j)]).collect();
        DistVector { map: Arc::clone(&self.map), data }
    }
}
