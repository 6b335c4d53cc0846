//! Solver context: pairs an operator with an optional preconditioner and a solver choice.
//!
//! # Usage
//!
//! 1. Construct a `KspContext` with the solver kind, operator, tolerance and iteration limit.
//! 2. Attach a preconditioner with [`KspContext::with_pc`] (typically an [`MgPreconditioner`]).
//! 3. Call `solve` for each right-hand side.
//!
//! [`MgPreconditioner`]: crate::multigrid::MgPreconditioner

use crate::config::ParameterList;
use crate::core::traits::Operator;
use crate::core::vector::DistVector;
use crate::error::MgError;
use crate::preconditioner::Preconditioner;
use crate::solver::{LinearSolver, PcgSolver, RichardsonSolver};
use crate::utils::convergence::SolveStats;

/// Available iterative solvers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverKind {
    /// Stationary iteration x ← x + M⁻¹(b − A·x)
    Richardson,
    /// Preconditioned Conjugate Gradient (SPD operators and preconditioners)
    Pcg,
}

impl SolverKind {
    fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "richardson" => Some(SolverKind::Richardson),
            "cg" | "pcg" => Some(SolverKind::Pcg),
            _ => None,
        }
    }
}

pub struct KspContext<M> {
    pub kind: SolverKind,
    pub a: M,
    pub pc: Option<Box<dyn Preconditioner<M, DistVector>>>,
    /// Relative residual tolerance
    pub tol: f64,
    pub max_it: usize,
}

impl<M: Operator> KspContext<M> {
    pub fn new(kind: SolverKind, a: M, tol: f64, max_it: usize) -> Self {
        KspContext { kind, a, pc: None, tol, max_it }
    }

    /// Reads `"solver"` (`richardson` | `pcg`), `"tolerance"` and `"max iterations"`.
    pub fn from_params(a: M, params: &ParameterList) -> Result<Self, MgError> {
        let name: String = params.get_or("solver", "pcg".to_string())?;
        let kind = SolverKind::parse(&name).ok_or_else(|| MgError::InvalidParameter {
            key: "solver".to_string(),
            reason: format!("unknown solver \"{name}\""),
        })?;
        let tol = params.get_or("tolerance", 1e-8)?;
        let max_it = params.get_or("max iterations", 100_usize)?;
        Ok(KspContext::new(kind, a, tol, max_it))
    }

    pub fn with_pc(mut self, pc: impl Preconditioner<M, DistVector> + 'static) -> Self {
        self.pc = Some(Box::new(pc));
        self
    }

    /// Refresh the preconditioner for a new operator of the same shape.
    pub fn set_operator(&mut self, a: M) -> Result<(), MgError> {
        if let Some(pc) = self.pc.as_mut() {
            pc.setup(&a)?;
        }
        self.a = a;
        Ok(())
    }

    /// Solve A·x = b with the configured solver, starting from the guess in `x`.
    pub fn solve(&mut self, b: &DistVector, x: &mut DistVector) -> Result<SolveStats<f64>, MgError> {
        let pc = self.pc.as_deref();
        match self.kind {
            SolverKind::Richardson => RichardsonSolver::new(self.tol, self.max_it).solve(&self.a, pc, b, x),
            SolverKind::Pcg => PcgSolver::new(self.tol, self.max_it).solve(&self.a, pc, b, x),
        }
    }
}
