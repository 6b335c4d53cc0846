//! Factories: units of setup work that turn data on one level into new data.
//!
//! A factory declares the keys it reads ([`Input`]) and the keys it writes ([`Output`]),
//! each relative to its *home* level. The planner in [`crate::multigrid::manager`] orders
//! factory runs from these declarations; a factory's `build` then only ever sees inputs
//! that are already present, through a [`BuildContext`].

use std::fmt;
use std::sync::Arc;

use crate::core::vector::MultiVector;
use crate::error::MgError;
use crate::matrix::CrsMatrix;
use crate::multigrid::level::{DataKey, Level, LevelValue, Producer, ReuseClass};

pub mod aggregation;
pub mod coalesce_drop;
pub mod coordinates;
pub mod nullspace;
pub mod rap;
pub mod sa_p;
pub mod smoother;
pub mod tentative_p;
pub mod trans_p;

pub use aggregation::{AggregationFactory, Aggregates};
pub use coalesce_drop::{AmalgamatedGraph, CoalesceDropFactory};
pub use coordinates::CoordinatesTransferFactory;
pub use nullspace::NullspaceFactory;
pub use rap::RapFactory;
pub use sa_p::SaPFactory;
pub use smoother::{DirectSolverFactory, SmootherFactory};
pub use tentative_p::TentativePFactory;
pub use trans_p::TransPFactory;

/// Handle of a factory registered with a [`crate::multigrid::FactoryManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FactoryId(pub(crate) usize);

impl FactoryId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Level of an input or output relative to the factory's home level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rel {
    Here,
    Coarser,
}

impl Rel {
    pub fn offset(self) -> usize {
        match self {
            Rel::Here => 0,
            Rel::Coarser => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Input {
    pub key: DataKey,
    pub at: Rel,
    /// Generating factory; `None` defers to the level override or the manager.
    pub factory: Option<FactoryId>,
    pub optional: bool,
}

impl Input {
    pub fn here(key: DataKey) -> Self {
        Input { key, at: Rel::Here, factory: None, optional: false }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn from_factory(mut self, id: FactoryId) -> Self {
        self.factory = Some(id);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Output {
    pub key: DataKey,
    pub at: Rel,
    /// An optional output may legitimately be left unset by `build`.
    pub optional: bool,
}

impl Output {
    pub fn here(key: DataKey) -> Self {
        Output { key, at: Rel::Here, optional: false }
    }

    pub fn coarser(key: DataKey) -> Self {
        Output { key, at: Rel::Coarser, optional: false }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

pub trait Factory: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Keys read by `build` when run with `level` as its home.
    fn declare_inputs(&self, level: &Level) -> Vec<Input>;

    fn outputs(&self) -> Vec<Output>;

    /// Reuse class stamped on every entry this factory writes.
    fn reuse_class(&self) -> ReuseClass;

    fn build(&self, ctx: &mut BuildContext<'_>) -> Result<(), MgError>;
}

/// A factory's view of the level arena while it runs.
pub struct BuildContext<'a> {
    levels: &'a mut Vec<Level>,
    home: usize,
    id: FactoryId,
    name: String,
    class: ReuseClass,
}

impl<'a> BuildContext<'a> {
    pub(crate) fn new(levels: &'a mut Vec<Level>, home: usize, id: FactoryId, factory: &dyn Factory) -> Self {
        BuildContext { levels, home, id, name: factory.name().to_string(), class: factory.reuse_class() }
    }

    /// Index of the home level.
    pub fn level(&self) -> usize {
        self.home
    }

    fn home_level(&self) -> Result<&Level, MgError> {
        self.levels
            .get(self.home)
            .ok_or(MgError::OutOfRange { index: self.home, bound: self.levels.len() })
    }

    pub fn get(&self, key: DataKey) -> Result<&LevelValue, MgError> {
        self.home_level()?.get(key)
    }

    pub fn is_available(&self, key: DataKey) -> bool {
        self.home_level().is_ok_and(|l| l.is_available(key))
    }

    pub fn matrix(&self, key: DataKey) -> Result<Arc<CrsMatrix>, MgError> {
        self.home_level()?.matrix(key).cloned()
    }

    pub fn vectors(&self, key: DataKey) -> Result<Arc<MultiVector>, MgError> {
        self.home_level()?.vectors(key).cloned()
    }

    pub fn graph(&self) -> Result<Arc<AmalgamatedGraph>, MgError> {
        self.home_level()?.graph().cloned()
    }

    pub fn aggregates(&self) -> Result<Arc<Aggregates>, MgError> {
        self.home_level()?.aggregates().cloned()
    }

    /// Write an output, creating the coarser level on demand.
    pub fn set(&mut self, key: DataKey, at: Rel, value: LevelValue) -> Result<(), MgError> {
        let target = self.home + at.offset();
        while self.levels.len() <= target {
            let next = self.levels.len();
            self.levels.push(Level::new(next));
        }
        self.levels[target].set(key, value, Producer::Factory(self.id), self.class)
    }

    /// A `BuildFailed` naming this factory and level.
    pub fn fail(&self, reason: impl Into<String>) -> MgError {
        MgError::BuildFailed { level: self.home, factory: self.name.clone(), reason: reason.into() }
    }
}
