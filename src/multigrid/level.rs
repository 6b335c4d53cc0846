//! Per-level data store.
//!
//! A [`Level`] maps a closed set of [`DataKey`]s to tagged [`LevelValue`]s. Every entry
//! remembers who produced it and which reuse class it belongs to, which is what
//! [`crate::multigrid::Hierarchy::reuse`] filters on. Values are reference counted so a
//! reused hierarchy shares them with the one it was derived from.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::core::vector::MultiVector;
use crate::error::MgError;
use crate::matrix::CrsMatrix;
use crate::multigrid::factory::{Aggregates, AmalgamatedGraph, FactoryId};
use crate::preconditioner::Smoother;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DataKey {
    A,
    Graph,
    Aggregates,
    Nullspace,
    Coordinates,
    Ptent,
    P,
    R,
    LambdaMax,
    Smoother,
}

impl fmt::Display for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Clone)]
pub enum LevelValue {
    Operator(Arc<CrsMatrix>),
    Transfer(Arc<CrsMatrix>),
    Graph(Arc<AmalgamatedGraph>),
    Aggregates(Arc<Aggregates>),
    VectorSet(Arc<MultiVector>),
    Smoother(Arc<dyn Smoother>),
    Scalar(f64),
}

impl LevelValue {
    pub fn kind(&self) -> &'static str {
        match self {
            LevelValue::Operator(_) => "operator",
            LevelValue::Transfer(_) => "transfer operator",
            LevelValue::Graph(_) => "graph",
            LevelValue::Aggregates(_) => "aggregates",
            LevelValue::VectorSet(_) => "vector set",
            LevelValue::Smoother(_) => "smoother",
            LevelValue::Scalar(_) => "scalar",
        }
    }

    /// Whether both values hold the same allocation (or the same scalar).
    pub fn ptr_eq(&self, other: &LevelValue) -> bool {
        match (self, other) {
            (LevelValue::Operator(a), LevelValue::Operator(b)) | (LevelValue::Transfer(a), LevelValue::Transfer(b)) => {
                Arc::ptr_eq(a, b)
            }
            (LevelValue::Graph(a), LevelValue::Graph(b)) => Arc::ptr_eq(a, b),
            (LevelValue::Aggregates(a), LevelValue::Aggregates(b)) => Arc::ptr_eq(a, b),
            (LevelValue::VectorSet(a), LevelValue::VectorSet(b)) => Arc::ptr_eq(a, b),
            (LevelValue::Smoother(a), LevelValue::Smoother(b)) => Arc::ptr_eq(a, b),
            (LevelValue::Scalar(a), LevelValue::Scalar(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl fmt::Debug for LevelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelValue::Operator(a) | LevelValue::Transfer(a) => write!(f, "{}({})", self.kind(), a.describe()),
            LevelValue::Smoother(s) => write!(f, "smoother({})", s.name()),
            LevelValue::Scalar(v) => write!(f, "scalar({v})"),
            other => f.write_str(other.kind()),
        }
    }
}

/// Who put an entry on the level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Producer {
    User,
    Factory(FactoryId),
}

/// What a reuse pass may keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReuseClass {
    /// Depends only on the sparsity pattern (graph, aggregates, tentative prolongator).
    Structure,
    /// Smoothed transfer operators.
    Transfer,
    /// Depends on operator values (coarse operators, smoothers).
    Values,
    /// Supplied by the caller.
    User,
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub value: LevelValue,
    pub producer: Producer,
    pub class: ReuseClass,
}

#[derive(Debug, Clone)]
pub struct Level {
    index: usize,
    entries: BTreeMap<DataKey, Entry>,
    overrides: BTreeMap<DataKey, FactoryId>,
    finalized: bool,
}

impl Level {
    pub fn new(index: usize) -> Self {
        Level { index, entries: BTreeMap::new(), overrides: BTreeMap::new(), finalized: false }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub(crate) fn finalize(&mut self) {
        self.finalized = true;
    }

    /// Store or overwrite `key`. Fails once the level is finalized.
    pub fn set(&mut self, key: DataKey, value: LevelValue, producer: Producer, class: ReuseClass) -> Result<(), MgError> {
        if self.finalized {
            return Err(MgError::AlreadyFilled(format!("level {} is finalized; cannot set {key}", self.index)));
        }
        self.entries.insert(key, Entry { value, producer, class });
        Ok(())
    }

    pub fn set_user(&mut self, key: DataKey, value: LevelValue) -> Result<(), MgError> {
        self.set(key, value, Producer::User, ReuseClass::User)
    }

    /// Pure lookup; never triggers a factory.
    pub fn get(&self, key: DataKey) -> Result<&LevelValue, MgError> {
        self.entries
            .get(&key)
            .map(|e| &e.value)
            .ok_or(MgError::MissingDependency { key, level: self.index })
    }

    pub fn entry(&self, key: DataKey) -> Option<&Entry> {
        self.entries.get(&key)
    }

    pub fn is_available(&self, key: DataKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn keys(&self) -> impl Iterator<Item = DataKey> + '_ {
        self.entries.keys().copied()
    }

    pub(crate) fn remove(&mut self, key: DataKey) -> Option<Entry> {
        self.entries.remove(&key)
    }

    /// Route `key` on this level to `factory`, overriding the manager.
    pub fn declare_input(&mut self, key: DataKey, factory: FactoryId) {
        self.overrides.insert(key, factory);
    }

    pub fn declared_factory(&self, key: DataKey) -> Option<FactoryId> {
        self.overrides.get(&key).copied()
    }

    pub(crate) fn undeclare_input(&mut self, key: DataKey) -> Option<FactoryId> {
        self.overrides.remove(&key)
    }

    /// Copy of this level holding only the entries `keep` accepts.
    pub(crate) fn filtered(&self, keep: impl Fn(DataKey, &Entry) -> bool) -> Level {
        Level {
            index: self.index,
            entries: self
                .entries
                .iter()
                .filter(|(k, e)| keep(**k, e))
                .map(|(k, e)| (*k, e.clone()))
                .collect(),
            overrides: self.overrides.clone(),
            finalized: false,
        }
    }

    /// `A` or a transfer operator stored under `key`.
    pub fn matrix(&self, key: DataKey) -> Result<&Arc<CrsMatrix>, MgError> {
        match self.get(key)? {
            LevelValue::Operator(m) | LevelValue::Transfer(m) => Ok(m),
            _ => Err(MgError::Unsupported("level entry is not a matrix")),
        }
    }

    pub fn vectors(&self, key: DataKey) -> Result<&Arc<MultiVector>, MgError> {
        match self.get(key)? {
            LevelValue::VectorSet(v) => Ok(v),
            _ => Err(MgError::Unsupported("level entry is not a vector set")),
        }
    }

    pub fn graph(&self) -> Result<&Arc<AmalgamatedGraph>, MgError> {
        match self.get(DataKey::Graph)? {
            LevelValue::Graph(g) => Ok(g),
            _ => Err(MgError::Unsupported("level entry is not a graph")),
        }
    }

    pub fn aggregates(&self) -> Result<&Arc<Aggregates>, MgError> {
        match self.get(DataKey::Aggregates)? {
            LevelValue::Aggregates(a) => Ok(a),
            _ => Err(MgError::Unsupported("level entry is not an aggregation")),
        }
    }

    pub fn smoother(&self) -> Result<&Arc<dyn Smoother>, MgError> {
        match self.get(DataKey::Smoother)? {
            LevelValue::Smoother(s) => Ok(s),
            _ => Err(MgError::Unsupported("level entry is not a smoother")),
        }
    }

    pub fn scalar(&self, key: DataKey) -> Result<f64, MgError> {
        match self.get(key)? {
            LevelValue::Scalar(v) => Ok(*v),
            _ => Err(MgError::Unsupported("level entry is not a scalar")),
        }
    }
}
