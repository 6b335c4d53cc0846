//! Preconditioned Conjugate Gradient (PCG) per Saad §9.2

use std::sync::Arc;

use log::{trace, warn};

use crate::core::traits::Operator;
use crate::core::vector::DistVector;
use crate::error::MgError;
use crate::preconditioner::Preconditioner;
use crate::solver::LinearSolver;
use crate::utils::convergence::{Convergence, SolveStats};

/// Norm used for the stopping test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgNormType {
    /// ‖M⁻¹r‖
    Preconditioned,
    /// ‖r‖
    Unpreconditioned,
    /// √(rᵀM⁻¹r)
    Natural,
}

pub struct PcgSolver {
    pub conv: Convergence<f64>,
    pub norm_type: CgNormType,
    pub monitor: Option<Box<dyn FnMut(usize, f64)>>,
    pub residual_history: Vec<f64>,
}

impl PcgSolver {
    pub fn new(tol: f64, max_iters: usize) -> Self {
        Self {
            conv: Convergence::new(tol, max_iters),
            norm_type: CgNormType::Unpreconditioned,
            monitor: None,
            residual_history: Vec::new(),
        }
    }

    pub fn with_norm(mut self, norm_type: CgNormType) -> Self {
        self.norm_type = norm_type;
        self
    }

    pub fn with_monitor<F>(mut self, f: F) -> Self
    where
        F: FnMut(usize, f64) + 'static,
    {
        self.monitor = Some(Box::new(f));
        self
    }

    fn norm(&self, r: &DistVector, z: &DistVector, rz: f64) -> f64 {
        match self.norm_type {
            CgNormType::Preconditioned => z.norm2(),
            CgNormType::Unpreconditioned => r.norm2(),
            CgNormType::Natural => rz.abs().sqrt(),
        }
    }

    fn record(&mut self, i: usize, res: f64) {
        if let Some(monitor) = self.monitor.as_mut() {
            monitor(i, res);
        }
        self.residual_history.push(res);
    }
}

fn precondition<M>(
    pc: Option<&dyn Preconditioner<M, DistVector>>,
    r: &DistVector,
    z: &mut DistVector,
) -> Result<(), MgError> {
    match pc {
        Some(pc) => pc.apply(r, z),
        None => {
            z.copy_from(r);
            Ok(())
        }
    }
}

impl<M: Operator> LinearSolver<M, DistVector> for PcgSolver {
    type Error = MgError;
    type Scalar = f64;

    fn solve(
        &mut self,
        a: &M,
        pc: Option<&dyn Preconditioner<M, DistVector>>,
        b: &DistVector,
        x: &mut DistVector,
    ) -> Result<SolveStats<f64>, MgError> {
        self.residual_history.clear();
        let mut r = b.clone();
        a.apply(x, &mut r, Default::default(), -1.0, 1.0)?;
        let mut z = DistVector::zeros(Arc::clone(r.map()));
        precondition(pc, &r, &mut z)?;
        let mut p = z.clone();
        let mut ap = DistVector::zeros(Arc::clone(r.map()));
        let mut rz = r.dot(&z);
        let res0 = self.norm(&r, &z, rz);
        self.record(0, res0);
        if res0 == 0.0 {
            return Ok(SolveStats::from_history(self.residual_history.clone(), true));
        }

        for i in 1..=self.conv.max_iters {
            a.matvec(&p, &mut ap)?;
            let p_ap = p.dot(&ap);
            if p_ap <= 0.0 || !p_ap.is_finite() {
                warn!("PCG breakdown at iteration {i}: pᵀAp = {p_ap:e}");
                return Ok(SolveStats::from_history(self.residual_history.clone(), false));
            }
            let alpha = rz / p_ap;
            x.axpy(alpha, &p);
            r.axpy(-alpha, &ap);
            precondition(pc, &r, &mut z)?;
            let rz_new = r.dot(&z);
            let res = self.norm(&r, &z, rz_new);
            self.record(i, res);
            trace!("pcg {i}: |r| = {res:.6e}");
            let (stop, converged) = self.conv.check(res, res0, i);
            if stop {
                return Ok(SolveStats::from_history(self.residual_history.clone(), converged));
            }
            let beta = rz_new / rz;
            if beta < 0.0 {
                warn!("PCG breakdown at iteration {i}: preconditioner is not positive definite");
                return Ok(SolveStats::from_history(self.residual_history.clone(), false));
            }
            p.update(1.0, &z, beta);
            rz = rz_new;
        }
        Ok(SolveStats::from_history(self.residual_history.clone(), false))
    }
}
