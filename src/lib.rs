//! mulgrid: factory-driven algebraic multigrid over distributed sparse operators
//!
//! This crate builds smoothed-aggregation multigrid hierarchies for sparse linear systems
//! distributed across ranks, and applies them as preconditioners inside iterative solvers.
//! Setup is demand driven: a [`multigrid::FactoryManager`] plans which factories run to
//! produce each level's transfer operators, coarse operator and smoother.

pub mod parallel;

pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod matrix;
pub mod multigrid;
pub mod preconditioner;
pub mod solver;
pub mod utils;

// Re-exports for convenience
pub use config::*;
pub use context::*;
pub use self::core::*;
pub use error::*;
pub use matrix::{CrsMatrix, gallery};
pub use multigrid::{DataKey, FactoryManager, Hierarchy, HierarchyState, LevelValue, MgPreconditioner};
pub use parallel::{Comm, Map, SerialComm, ThreadComm};
pub use preconditioner::{Preconditioner, Smoother};
pub use solver::*;

pub use utils::convergence::SolveStats;
