//! Convergence tracking & tolerance checks for iterative solvers.

use num_traits::Float;

/// Stopping criteria on the relative residual ‖r‖ / ‖r₀‖.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Convergence<T> {
    pub tol: T,
    pub max_iters: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SolveStats<T> {
    pub iterations: usize,
    pub final_residual: T,
    pub converged: bool,
    /// ‖r‖ before the first iteration and after each one.
    pub residual_history: Vec<T>,
}

impl<T: Float> Convergence<T> {
    pub fn new(tol: T, max_iters: usize) -> Self {
        Convergence { tol, max_iters }
    }

    /// A zero initial residual is converged by definition.
    pub fn is_converged(&self, res_norm: T, res0_norm: T) -> bool {
        res0_norm == T::zero() || res_norm / res0_norm <= self.tol
    }

    /// Returns `(should_stop, converged)` given the current residual and iteration `i`.
    pub fn check(&self, res_norm: T, res0_norm: T, i: usize) -> (bool, bool) {
        let converged = self.is_converged(res_norm, res0_norm);
        (converged || i >= self.max_iters || !res_norm.is_finite(), converged)
    }
}

impl<T: Float> SolveStats<T> {
    /// Stats from a residual history whose first entry is the initial residual.
    pub fn from_history(residual_history: Vec<T>, converged: bool) -> Self {
        SolveStats {
            iterations: residual_history.len().saturating_sub(1),
            final_residual: residual_history.last().copied().unwrap_or_else(T::zero),
            converged,
            residual_history,
        }
    }

    /// Average reduction factor per iteration, (‖r_n‖ / ‖r₀‖)^(1/n).
    pub fn average_reduction(&self) -> Option<T> {
        let r0 = *self.residual_history.first()?;
        if self.iterations == 0 || r0 == T::zero() {
            return None;
        }
        let n = T::from(self.iterations)?;
        Some((self.final_residual / r0).powf(T::one() / n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn stops_on_tolerance_or_budget() {
        let c = Convergence::new(1e-6, 10);
        assert_eq!(c.check(1e-7, 1.0, 3), (true, true));
        assert_eq!(c.check(1e-3, 1.0, 3), (false, false));
        assert_eq!(c.check(1e-3, 1.0, 10), (true, false));
        assert_eq!(c.check(f64::NAN, 1.0, 1), (true, false));
        assert!(c.is_converged(5.0, 0.0));
    }

    #[test]
    fn history_summary() {
        let s = SolveStats::from_history(vec![1.0, 0.1, 0.01], true);
        assert_eq!(s.iterations, 2);
        assert_eq!(s.final_residual, 0.01);
        assert_relative_eq!(s.average_reduction().unwrap(), 0.1, epsilon = 1e-12);
    }
}
