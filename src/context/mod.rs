//! Context module: user-facing entry points.
//!
//! - [`pc_context`]: build and reuse a multigrid preconditioner from a parameter list.
//! - [`ksp_context`]: the `KspContext` struct pairing an operator, a preconditioner and a solver.
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems. SIAM.
//! - Trottenberg, Oosterlee, Schüller (2001). Multigrid. Academic Press.

pub mod ksp_context;
pub mod pc_context;

pub use ksp_context::{KspContext, SolverKind};
pub use pc_context::{UserData, create_preconditioner, reuse_preconditioner};
