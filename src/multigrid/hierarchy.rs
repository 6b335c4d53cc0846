//! The multigrid hierarchy: an arena of levels built on demand by the factory manager.
//!
//! State machine: `Empty` (no operator) → `Building` (fine operator set, levels being
//! populated) → `Ready` (levels finalized, usable by the cycle). `reuse` turns a ready
//! hierarchy into a new one that shares the retained setup data and is built again from
//! level 0.
//!
//! All setup entry points are collective: every rank must make the same calls in the same
//! order, which the deterministic planner guarantees for identical options.

use std::fmt::Write as _;
use std::sync::Arc;

use log::{debug, info, trace, warn};

use crate::config::{MgOptions, ReuseType};
use crate::core::vector::DistVector;
use crate::error::MgError;
use crate::matrix::CrsMatrix;
use crate::multigrid::factory::{BuildContext, Output};
use crate::multigrid::level::{DataKey, Entry, Level, LevelValue, ReuseClass};
use crate::multigrid::manager::{FactoryManager, Step};
use crate::multigrid::operator::cycle;
use crate::utils::convergence::{Convergence, SolveStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HierarchyState {
    Empty,
    Building,
    Ready,
}

/// Outcome of [`Hierarchy::setup`].
#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    pub num_levels: usize,
    /// Global rows of `A` per level, finest first.
    pub rows: Vec<usize>,
    /// Global stored entries of `A` per level.
    pub entries: Vec<usize>,
    pub operator_complexity: f64,
    pub grid_complexity: f64,
    /// Why coarsening stopped early, if it did.
    pub truncated: Option<MgError>,
}

/// Setup data removed from the last kept level when coarsening is truncated.
const TRANSFER_KEYS: [DataKey; 6] = [
    DataKey::Graph,
    DataKey::Aggregates,
    DataKey::Ptent,
    DataKey::P,
    DataKey::R,
    DataKey::LambdaMax,
];

#[derive(Debug, Clone)]
pub struct Hierarchy {
    levels: Vec<Level>,
    manager: Arc<FactoryManager>,
    options: MgOptions,
    state: HierarchyState,
    report: Option<BuildReport>,
}

fn output_present(levels: &[Level], home: usize, o: &Output) -> bool {
    levels.get(home + o.at.offset()).is_some_and(|l| l.is_available(o.key))
}

impl Hierarchy {
    pub fn new(manager: Arc<FactoryManager>, options: MgOptions) -> Self {
        Hierarchy { levels: Vec::new(), manager, options, state: HierarchyState::Empty, report: None }
    }

    /// Hierarchy with the standard factory pipeline for `options`.
    pub fn from_options(options: MgOptions) -> Self {
        let manager = Arc::new(FactoryManager::new(&options));
        Hierarchy::new(manager, options)
    }

    pub fn state(&self) -> HierarchyState {
        self.state
    }

    pub fn options(&self) -> &MgOptions {
        &self.options
    }

    pub fn manager(&self) -> &Arc<FactoryManager> {
        &self.manager
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn level(&self, i: usize) -> Result<&Level, MgError> {
        self.levels.get(i).ok_or(MgError::OutOfRange { index: i, bound: self.levels.len() })
    }

    pub(crate) fn level_mut(&mut self, i: usize) -> Result<&mut Level, MgError> {
        let bound = self.levels.len();
        self.levels.get_mut(i).ok_or(MgError::OutOfRange { index: i, bound })
    }

    pub fn report(&self) -> Option<&BuildReport> {
        self.report.as_ref()
    }

    pub fn fine_operator(&self) -> Result<&Arc<CrsMatrix>, MgError> {
        self.level(0)?.matrix(DataKey::A)
    }

    /// Seed level 0. The operator must be filled and square.
    pub fn set_fine_operator(&mut self, a: Arc<CrsMatrix>) -> Result<(), MgError> {
        if self.state != HierarchyState::Empty {
            return Err(MgError::AlreadyFilled("hierarchy already has a fine operator".to_string()));
        }
        if !a.is_fill_complete() {
            return Err(MgError::NotReady(format!("{}: fill_complete has not been called", a.label_str())));
        }
        if a.global_num_rows() != a.global_num_cols()? {
            return Err(MgError::dim(format!(
                "fine operator is {}x{}",
                a.global_num_rows(),
                a.global_num_cols()?
            )));
        }
        let mut fine = Level::new(0);
        fine.set_user(DataKey::A, LevelValue::Operator(a))?;
        self.levels = vec![fine];
        self.state = HierarchyState::Building;
        Ok(())
    }

    /// Attach caller data (near-nullspace, coordinates, ...) to the fine level.
    pub fn set_user_data(&mut self, key: DataKey, value: LevelValue) -> Result<(), MgError> {
        if self.state != HierarchyState::Building {
            return Err(MgError::NotReady("set the fine operator before attaching data".to_string()));
        }
        self.level_mut(0)?.set_user(key, value)
    }

    /// Make `key` available on `level`, running whatever factories it depends on.
    ///
    /// Once the hierarchy is ready this is a pure lookup.
    pub fn get(&mut self, level: usize, key: DataKey) -> Result<LevelValue, MgError> {
        if self.state == HierarchyState::Building {
            self.ensure(level, key)?;
        }
        self.level(level)?.get(key).cloned()
    }

    /// Run the plan for `key` without requiring it to end up present (optional outputs).
    fn ensure(&mut self, level: usize, key: DataKey) -> Result<(), MgError> {
        let steps = self.manager.plan(&self.levels, level, key)?;
        self.execute(&steps)
    }

    fn execute(&mut self, steps: &[Step]) -> Result<(), MgError> {
        for step in steps {
            let factory = Arc::clone(self.manager.factory(step.factory)?);
            let outputs = factory.outputs();
            let required: Vec<&Output> = outputs.iter().filter(|o| !o.optional).collect();
            let done = if required.is_empty() {
                outputs.iter().all(|o| output_present(&self.levels, step.level, o))
            } else {
                required.iter().all(|o| output_present(&self.levels, step.level, o))
            };
            if done {
                continue;
            }
            while self.levels.len() <= step.level {
                let next = self.levels.len();
                self.levels.push(Level::new(next));
            }
            trace!("level {}: running {}", step.level, factory.name());
            let mut ctx = BuildContext::new(&mut self.levels, step.level, step.factory, factory.as_ref());
            factory.build(&mut ctx)?;
            if let Some(o) = required.iter().find(|o| !output_present(&self.levels, step.level, o)) {
                return Err(MgError::BuildFailed {
                    level: step.level,
                    factory: factory.name().to_string(),
                    reason: format!("{} was not produced", o.key),
                });
            }
        }
        Ok(())
    }

    fn rows(&self, level: usize) -> Result<usize, MgError> {
        Ok(self.level(level)?.matrix(DataKey::A)?.global_num_rows())
    }

    /// Populate transfer operators and the smoother of level `k` and the operator of
    /// level `k + 1`.
    pub fn build_level(&mut self, k: usize) -> Result<(), MgError> {
        if self.state != HierarchyState::Building {
            return Err(MgError::NotReady("hierarchy is not being built".to_string()));
        }
        self.ensure(k, DataKey::P)?;
        self.ensure(k, DataKey::R)?;
        self.ensure(k + 1, DataKey::A)?;
        let fine_rows = self.rows(k)?;
        let coarse_rows = self.rows(k + 1)?;
        if coarse_rows >= fine_rows || coarse_rows == 0 {
            return Err(MgError::StallDetected { level: k, fine_rows, coarse_rows });
        }
        if self.level(k)?.is_available(DataKey::Coordinates) {
            self.ensure(k + 1, DataKey::Coordinates)?;
        }
        self.ensure(k, DataKey::Smoother)?;
        debug!("level {k}: {fine_rows} rows coarsened to {coarse_rows}");
        Ok(())
    }

    /// Drop everything past level `k` and the coarsening data of level `k` itself.
    fn discard_coarser(&mut self, k: usize) {
        self.levels.truncate(k + 1);
        if let Some(l) = self.levels.get_mut(k) {
            for key in TRANSFER_KEYS {
                l.remove(key);
            }
        }
    }

    /// Coarsen until the operator is small enough or the level budget is spent, then set
    /// up the coarse solve and freeze every level.
    pub fn setup(&mut self) -> Result<BuildReport, MgError> {
        match self.state {
            HierarchyState::Empty => return Err(MgError::NotReady("no fine operator".to_string())),
            HierarchyState::Ready => return Err(MgError::AlreadyFilled("hierarchy is already set up".to_string())),
            HierarchyState::Building => {}
        }
        let mut truncated = None;
        let mut k = 0;
        let mut fine_entries = 0;
        let mut total_entries = 0;
        loop {
            let rows = self.rows(k)?;
            let entries = self.level(k)?.matrix(DataKey::A)?.global_num_entries();
            if k == 0 {
                fine_entries = entries.max(1);
            }
            total_entries += entries;
            // transfers retained from a previous setup fix the level count
            let retained = {
                let l = self.level(k)?;
                l.is_available(DataKey::P) || l.is_available(DataKey::Ptent)
            };
            if k + 1 >= self.options.max_levels || (rows <= self.options.coarse_max_size && !retained) {
                break;
            }
            let complexity = total_entries as f64 / fine_entries as f64;
            if complexity >= self.options.max_operator_complexity && !retained {
                debug!("operator complexity {complexity:.3} reached at level {k}");
                break;
            }
            match self.build_level(k) {
                Ok(()) => k += 1,
                Err(e) if e.is_recoverable() => {
                    warn!("coarsening stopped at level {k}: {e}");
                    self.discard_coarser(k);
                    truncated = Some(e);
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        self.levels.truncate(k + 1);
        if let Some(id) = self.manager.coarse_solver() {
            self.level_mut(k)?.declare_input(DataKey::Smoother, id);
            self.ensure(k, DataKey::Smoother)?;
        }

        let mut rows = Vec::with_capacity(self.levels.len());
        let mut entries = Vec::with_capacity(self.levels.len());
        for l in &self.levels {
            let a = l.matrix(DataKey::A)?;
            rows.push(a.global_num_rows());
            entries.push(a.global_num_entries());
        }
        let ratio = |v: &[usize]| match v.first() {
            Some(&first) if first > 0 => v.iter().sum::<usize>() as f64 / first as f64,
            _ => 1.0,
        };
        let report = BuildReport {
            num_levels: self.levels.len(),
            operator_complexity: ratio(&entries),
            grid_complexity: ratio(&rows),
            rows,
            entries,
            truncated,
        };
        for l in &mut self.levels {
            l.finalize();
        }
        self.state = HierarchyState::Ready;
        info!(
            "multigrid hierarchy: {} levels, operator complexity {:.3}, grid complexity {:.3}",
            report.num_levels, report.operator_complexity, report.grid_complexity
        );
        self.report = Some(report.clone());
        Ok(report)
    }

    fn require_ready(&self) -> Result<(), MgError> {
        if self.state == HierarchyState::Ready {
            Ok(())
        } else {
            Err(MgError::NotReady("hierarchy has not been set up".to_string()))
        }
    }

    /// A new hierarchy for `new_a` (same row distribution) that keeps the setup data the
    /// reuse policy allows and rebuilds the rest.
    pub fn reuse(&self, new_a: Arc<CrsMatrix>) -> Result<Hierarchy, MgError> {
        self.require_ready()?;
        if !new_a.is_fill_complete() {
            return Err(MgError::NotReady(format!("{}: fill_complete has not been called", new_a.label_str())));
        }
        if !new_a.row_map().is_same_as(self.fine_operator()?.row_map()) {
            return Err(MgError::dim("reuse: new operator is distributed differently"));
        }
        let keep = |class: ReuseClass| match self.options.reuse {
            ReuseType::None => class == ReuseClass::User,
            ReuseType::TentativeP => matches!(class, ReuseClass::User | ReuseClass::Structure),
            ReuseType::Rp => matches!(class, ReuseClass::User | ReuseClass::Structure | ReuseClass::Transfer),
        };
        // spectral estimates describe the old operator values
        let retain = |key: DataKey, e: &Entry| {
            keep(e.class) && (key != DataKey::LambdaMax || e.class == ReuseClass::User)
        };
        let mut levels: Vec<Level> = match self.options.reuse {
            ReuseType::None => vec![self.levels[0].filtered(retain)],
            _ => self.levels.iter().map(|l| l.filtered(retain)).collect(),
        };
        let coarsest = self.levels.len() - 1;
        if let (Some(id), Some(l)) = (self.manager.coarse_solver(), levels.get_mut(coarsest)) {
            if l.declared_factory(DataKey::Smoother) == Some(id) {
                l.undeclare_input(DataKey::Smoother);
            }
        }
        levels[0].set_user(DataKey::A, LevelValue::Operator(new_a))?;
        let mut h = Hierarchy {
            levels,
            manager: Arc::clone(&self.manager),
            options: self.options.clone(),
            state: HierarchyState::Building,
            report: None,
        };
        h.setup()?;
        Ok(h)
    }

    /// Stationary multigrid: up to `cycles` cycles on A·x = b, stopping once
    /// ‖b − A·x‖ ≤ tol·‖b − A·x₀‖.
    pub fn iterate(&self, b: &DistVector, x: &mut DistVector, cycles: usize, tol: f64) -> Result<SolveStats<f64>, MgError> {
        self.require_ready()?;
        let a = self.fine_operator()?;
        let mut r = DistVector::zeros(Arc::clone(a.row_map()));
        a.residual(x, b, &mut r)?;
        let r0 = r.norm2();
        let conv = Convergence::new(tol, cycles);
        let mut history = vec![r0];
        if r0 == 0.0 {
            return Ok(SolveStats::from_history(history, true));
        }
        for i in 1..=cycles {
            cycle(self, 0, b, x, false, self.options.cycle, self.options.placement)?;
            a.residual(x, b, &mut r)?;
            let rn = r.norm2();
            history.push(rn);
            trace!("cycle {i}: |r| = {rn:.6e}");
            let (stop, converged) = conv.check(rn, r0, i);
            if stop {
                return Ok(SolveStats::from_history(history, converged));
            }
        }
        Ok(SolveStats::from_history(history, false))
    }

    pub fn operator_complexity(&self) -> Result<f64, MgError> {
        self.require_ready()?;
        Ok(self.report.as_ref().map_or(1.0, |r| r.operator_complexity))
    }

    pub fn grid_complexity(&self) -> Result<f64, MgError> {
        self.require_ready()?;
        Ok(self.report.as_ref().map_or(1.0, |r| r.grid_complexity))
    }

    /// Multi-line summary; local information only.
    pub fn describe(&self) -> String {
        let mut s = format!("Hierarchy [{:?}] {} level(s)\n", self.state, self.levels.len());
        for (i, l) in self.levels.iter().enumerate() {
            let rows = l.matrix(DataKey::A).map_or(0, |a| a.global_num_rows());
            let smoother = l.smoother().map_or("none", |sm| sm.name());
            let _ = writeln!(s, "  level {i}: {rows} rows, smoother {smoother}");
        }
        if let Some(r) = &self.report {
            let _ = writeln!(
                s,
                "  operator complexity {:.3}, grid complexity {:.3}",
                r.operator_complexity, r.grid_complexity
            );
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoarseType;
    use crate::matrix::gallery;
    use crate::parallel::SerialComm;

    fn laplace(n: usize) -> Arc<CrsMatrix> {
        Arc::new(gallery::laplace_1d(n, Arc::new(SerialComm)).unwrap())
    }

    fn opts(coarse_max_size: usize) -> MgOptions {
        MgOptions { coarse_max_size, ..Default::default() }
    }

    #[test]
    fn setup_coarsens_until_small() {
        let mut h = Hierarchy::from_options(opts(10));
        h.set_fine_operator(laplace(200)).unwrap();
        let report = h.setup().unwrap();
        assert_eq!(h.state(), HierarchyState::Ready);
        assert!(report.num_levels >= 3);
        assert!(*report.rows.last().unwrap() <= 10);
        assert!(report.rows.windows(2).all(|w| w[1] < w[0]));
        assert!(report.operator_complexity > 1.0 && report.operator_complexity < 2.0);
        assert!(report.truncated.is_none());
        let coarsest = h.level(report.num_levels - 1).unwrap();
        assert_eq!(coarsest.smoother().unwrap().name(), "direct LU");
        assert!(h.level(0).unwrap().is_finalized());
    }

    #[test]
    fn lifecycle_errors() {
        let mut h = Hierarchy::from_options(MgOptions::default());
        assert!(matches!(h.setup(), Err(MgError::NotReady(_))));
        assert!(matches!(
            h.set_user_data(DataKey::LambdaMax, LevelValue::Scalar(1.0)),
            Err(MgError::NotReady(_))
        ));
        h.set_fine_operator(laplace(20)).unwrap();
        assert!(matches!(h.set_fine_operator(laplace(20)), Err(MgError::AlreadyFilled(_))));
        h.setup().unwrap();
        assert!(matches!(h.setup(), Err(MgError::AlreadyFilled(_))));
        assert!(matches!(h.get(0, DataKey::P), Err(MgError::MissingDependency { .. })));
    }

    #[test]
    fn max_levels_caps_the_depth() {
        let mut h = Hierarchy::from_options(MgOptions { max_levels: 2, coarse_max_size: 1, ..Default::default() });
        h.set_fine_operator(laplace(300)).unwrap();
        assert_eq!(h.setup().unwrap().num_levels, 2);
    }

    #[test]
    fn coarse_type_none_leaves_the_coarsest_level_bare() {
        let mut h = Hierarchy::from_options(MgOptions { coarse_type: CoarseType::None, ..opts(10) });
        h.set_fine_operator(laplace(60)).unwrap();
        let report = h.setup().unwrap();
        assert!(h.level(report.num_levels - 1).unwrap().smoother().is_err());
        assert!(h.level(0).unwrap().smoother().is_ok());
    }

    #[test]
    fn iterate_reduces_the_residual() {
        let mut h = Hierarchy::from_options(opts(10));
        let a = laplace(100);
        h.set_fine_operator(a.clone()).unwrap();
        h.setup().unwrap();
        let b = DistVector::from_global_fn(Arc::clone(a.row_map()), |g| (g as f64 * 0.1).sin());
        let mut x = DistVector::zeros(Arc::clone(a.row_map()));
        let stats = h.iterate(&b, &mut x, 30, 1e-8).unwrap();
        assert!(stats.converged);
        assert!(stats.iterations < 30);
    }

    #[test]
    fn describe_lists_levels() {
        let mut h = Hierarchy::from_options(opts(10));
        h.set_fine_operator(laplace(40)).unwrap();
        h.setup().unwrap();
        let d = h.describe();
        assert!(d.contains("level 0: 40 rows"));
        assert!(d.contains("direct LU"));
    }
}
