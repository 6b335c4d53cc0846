//! The multigrid cycle and the preconditioner operator built on it.
//!
//! A cycle only reads the hierarchy, so one [`MgPreconditioner`] can be applied from several
//! threads at once as long as each call works on its own vectors.

use std::sync::Arc;

use log::warn;

use crate::config::{CycleType, SmootherPlacement};
use crate::core::traits::{Operator, TransMode};
use crate::core::vector::DistVector;
use crate::error::MgError;
use crate::matrix::CrsMatrix;
use crate::multigrid::hierarchy::{Hierarchy, HierarchyState};
use crate::multigrid::level::DataKey;
use crate::parallel::Map;
use crate::preconditioner::Preconditioner;

/// One cycle on level `k`, improving `x` toward A_k·x = b.
pub(crate) fn cycle(
    h: &Hierarchy,
    k: usize,
    b: &DistVector,
    x: &mut DistVector,
    mut zero_guess: bool,
    shape: CycleType,
    placement: SmootherPlacement,
) -> Result<(), MgError> {
    let level = h.level(k)?;
    let smoother = level.smoother().ok();
    if k + 1 == h.num_levels() {
        if let Some(s) = smoother {
            s.apply(b, x, zero_guess)?;
        }
        return Ok(());
    }

    let a = level.matrix(DataKey::A)?;
    if placement.pre() {
        if let Some(s) = smoother {
            s.apply(b, x, zero_guess)?;
            zero_guess = false;
        }
    }

    let mut r = b.clone();
    if !zero_guess {
        a.residual(x, b, &mut r)?;
    }
    let restrict = level.matrix(DataKey::R)?;
    let prolong = level.matrix(DataKey::P)?;
    let coarse_map: Arc<Map> = Arc::clone(restrict.range_map()?);
    let mut rc = DistVector::zeros(Arc::clone(&coarse_map));
    restrict.matvec(&r, &mut rc)?;
    let mut xc = DistVector::zeros(coarse_map);
    for visit in 0..shape.mu() {
        cycle(h, k + 1, &rc, &mut xc, visit == 0, shape, placement)?;
    }

    let bad = xc.local().iter().any(|v| !v.is_finite());
    if a.comm().all_reduce_max(if bad { 1.0 } else { 0.0 }) > 0.0 {
        warn!("level {}: non-finite coarse correction discarded", k + 1);
    } else {
        prolong.apply(&xc, x, TransMode::NoTrans, 1.0, 1.0)?;
        zero_guess = false;
    }

    if placement.post() {
        if let Some(s) = smoother {
            s.apply(b, x, zero_guess)?;
        }
    }
    Ok(())
}

/// A ready hierarchy viewed as an approximate inverse of its fine operator.
#[derive(Debug, Clone)]
pub struct MgPreconditioner {
    hierarchy: Arc<Hierarchy>,
    cycle: CycleType,
    placement: SmootherPlacement,
}

impl MgPreconditioner {
    pub fn new(hierarchy: Arc<Hierarchy>) -> Result<Self, MgError> {
        if hierarchy.state() != HierarchyState::Ready {
            return Err(MgError::NotReady("hierarchy has not been set up".to_string()));
        }
        let cycle = hierarchy.options().cycle;
        let placement = hierarchy.options().placement;
        Ok(MgPreconditioner { hierarchy, cycle, placement })
    }

    pub fn with_cycle(mut self, cycle: CycleType) -> Self {
        self.cycle = cycle;
        self
    }

    pub fn with_placement(mut self, placement: SmootherPlacement) -> Self {
        self.placement = placement;
        self
    }

    pub fn hierarchy(&self) -> &Arc<Hierarchy> {
        &self.hierarchy
    }

    pub fn cycle_type(&self) -> CycleType {
        self.cycle
    }

    fn fine(&self) -> Result<&Arc<CrsMatrix>, MgError> {
        self.hierarchy.fine_operator()
    }

    /// One cycle from the guess in `x`. With `zero_guess` the incoming `x` is ignored.
    pub fn apply_with_guess(&self, b: &DistVector, x: &mut DistVector, zero_guess: bool) -> Result<(), MgError> {
        let a = self.fine()?;
        b.check_map(a.row_map(), "multigrid apply")?;
        x.check_map(a.row_map(), "multigrid apply")?;
        if zero_guess {
            x.fill(0.0);
        }
        cycle(&self.hierarchy, 0, b, x, zero_guess, self.cycle, self.placement)
    }

    /// Rebuild for a new fine operator through [`Hierarchy::reuse`].
    pub fn reuse(&mut self, a: Arc<CrsMatrix>) -> Result<(), MgError> {
        let h = self.hierarchy.reuse(a)?;
        self.hierarchy = Arc::new(h);
        Ok(())
    }
}

impl Operator for MgPreconditioner {
    /// y ← β·y + α·M⁻¹x, with M⁻¹x one cycle from a zero guess.
    fn apply(&self, x: &DistVector, y: &mut DistVector, mode: TransMode, alpha: f64, beta: f64) -> Result<(), MgError> {
        if mode != TransMode::NoTrans {
            return Err(MgError::Unsupported("multigrid preconditioner is applied untransposed only"));
        }
        let mut z = DistVector::zeros(Arc::clone(self.fine()?.row_map()));
        self.apply_with_guess(x, &mut z, true)?;
        if beta == 0.0 {
            y.check_map(z.map(), "multigrid apply")?;
            y.copy_from(&z);
            y.scale(alpha);
        } else {
            y.update(alpha, &z, beta);
        }
        Ok(())
    }

    fn domain_map(&self) -> Result<&Arc<Map>, MgError> {
        self.fine()?.domain_map()
    }

    fn range_map(&self) -> Result<&Arc<Map>, MgError> {
        self.fine()?.range_map()
    }

    fn label(&self) -> String {
        format!("{:?}-cycle multigrid ({} levels)", self.cycle, self.hierarchy.num_levels())
    }
}

impl Preconditioner<Arc<CrsMatrix>, DistVector> for MgPreconditioner {
    fn apply(&self, r: &DistVector, z: &mut DistVector) -> Result<(), MgError> {
        self.apply_with_guess(r, z, true)
    }

    fn setup(&mut self, a: &Arc<CrsMatrix>) -> Result<(), MgError> {
        self.reuse(Arc::clone(a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MgOptions;
    use crate::matrix::gallery;
    use crate::parallel::SerialComm;

    fn ready(n: usize) -> Arc<Hierarchy> {
        let mut h = Hierarchy::from_options(MgOptions { coarse_max_size: 10, ..Default::default() });
        h.set_fine_operator(Arc::new(gallery::laplace_1d(n, Arc::new(SerialComm)).unwrap())).unwrap();
        h.setup().unwrap();
        Arc::new(h)
    }

    #[test]
    fn unready_hierarchy_is_rejected() {
        let h = Hierarchy::from_options(MgOptions::default());
        assert!(matches!(MgPreconditioner::new(Arc::new(h)), Err(MgError::NotReady(_))));
    }

    #[test]
    fn operator_apply_scales_and_accumulates() {
        let pc = MgPreconditioner::new(ready(50)).unwrap();
        let map = Arc::clone(pc.domain_map().unwrap());
        let x = DistVector::from_global_fn(Arc::clone(&map), |g| 1.0 + g as f64);
        let mut z = DistVector::zeros(Arc::clone(&map));
        Operator::apply(&pc, &x, &mut z, TransMode::NoTrans, 1.0, 0.0).unwrap();
        let mut y = DistVector::from_global_fn(Arc::clone(&map), |_| 1.0);
        Operator::apply(&pc, &x, &mut y, TransMode::NoTrans, 2.0, 3.0).unwrap();
        for (yi, zi) in y.local().iter().zip(z.local()) {
            assert!((yi - (2.0 * zi + 3.0)).abs() < 1e-12);
        }
        assert!(Operator::apply(&pc, &x, &mut y, TransMode::Trans, 1.0, 0.0).is_err());
    }

    #[test]
    fn w_cycle_is_at_least_as_strong_as_v_cycle() {
        let h = ready(120);
        let a = Arc::clone(h.fine_operator().unwrap());
        let b = DistVector::from_global_fn(Arc::clone(a.row_map()), |g| ((g * 13) % 7) as f64 - 3.0);
        let residual = |pc: &MgPreconditioner| {
            let mut x = DistVector::zeros(Arc::clone(a.row_map()));
            pc.apply_with_guess(&b, &mut x, true).unwrap();
            let mut r = b.clone();
            a.residual(&x, &b, &mut r).unwrap();
            r.norm2()
        };
        let v = MgPreconditioner::new(h.clone()).unwrap();
        let w = v.clone().with_cycle(CycleType::W);
        assert!(residual(&w) <= residual(&v) * (1.0 + 1e-12));
        assert!(residual(&v) < b.norm2());
    }
}
