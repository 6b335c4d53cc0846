//! Preconditioned Richardson iteration, x ← x + ω·M⁻¹(b − A·x).
//!
//! With a multigrid preconditioner and ω = 1 this is the stationary multigrid solver.

use std::sync::Arc;

use log::trace;

use crate::core::traits::Operator;
use crate::core::vector::DistVector;
use crate::error::MgError;
use crate::preconditioner::Preconditioner;
use crate::solver::LinearSolver;
use crate::utils::convergence::{Convergence, SolveStats};

pub struct RichardsonSolver {
    pub conv: Convergence<f64>,
    pub damping: f64,
    /// ‖b − A·x‖ before the first sweep and after each one, from the last solve.
    pub residual_history: Vec<f64>,
}

impl RichardsonSolver {
    pub fn new(tol: f64, max_iters: usize) -> Self {
        RichardsonSolver { conv: Convergence::new(tol, max_iters), damping: 1.0, residual_history: Vec::new() }
    }

    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }
}

impl<M: Operator> LinearSolver<M, DistVector> for RichardsonSolver {
    type Error = MgError;
    type Scalar = f64;

    fn solve(
        &mut self,
        a: &M,
        pc: Option<&dyn Preconditioner<M, DistVector>>,
        b: &DistVector,
        x: &mut DistVector,
    ) -> Result<SolveStats<f64>, MgError> {
        let mut r = b.clone();
        a.apply(x, &mut r, Default::default(), -1.0, 1.0)?;
        let mut z = DistVector::zeros(Arc::clone(r.map()));
        let res0 = r.norm2();
        self.residual_history.clear();
        self.residual_history.push(res0);
        if res0 == 0.0 {
            return Ok(SolveStats::from_history(self.residual_history.clone(), true));
        }
        for i in 1..=self.conv.max_iters {
            match pc {
                Some(pc) => pc.apply(&r, &mut z)?,
                None => z.copy_from(&r),
            }
            x.axpy(self.damping, &z);
            r.copy_from(b);
            a.apply(x, &mut r, Default::default(), -1.0, 1.0)?;
            let res = r.norm2();
            self.residual_history.push(res);
            trace!("richardson {i}: |r| = {res:.6e}");
            let (stop, converged) = self.conv.check(res, res0, i);
            if stop {
                return Ok(SolveStats::from_history(self.residual_history.clone(), converged));
            }
        }
        Ok(SolveStats::from_history(self.residual_history.clone(), false))
    }
}
