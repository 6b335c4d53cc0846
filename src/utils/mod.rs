//! Numerical helpers shared by solvers and setup.

pub mod convergence;
pub mod eigen;

pub use convergence::{Convergence, SolveStats};
