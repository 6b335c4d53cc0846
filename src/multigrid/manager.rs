//! Factory registry and dependency planning.
//!
//! The manager owns every factory of a hierarchy and knows which factory produces each
//! [`DataKey`] by default. A request for `(level, key)` is turned into an ordered list of
//! build steps by a depth-first walk over declared inputs. Data is keyed by `DataKey`
//! alone, so a value already present on a level satisfies every request for it, whatever
//! factory was asked for.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{CoarseType, MgOptions};
use crate::error::MgError;
use crate::multigrid::factory::{
    AggregationFactory, CoalesceDropFactory, CoordinatesTransferFactory, DirectSolverFactory, Factory, FactoryId,
    NullspaceFactory, RapFactory, SaPFactory, SmootherFactory, TentativePFactory, TransPFactory,
};
use crate::multigrid::level::{DataKey, Level};

/// One factory run with `level` as its home.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub level: usize,
    pub factory: FactoryId,
}

#[derive(Debug, Clone)]
pub struct FactoryManager {
    factories: Vec<Arc<dyn Factory>>,
    defaults: BTreeMap<DataKey, FactoryId>,
    fine_overrides: BTreeMap<DataKey, FactoryId>,
    coarse_solver: Option<FactoryId>,
}

impl FactoryManager {
    /// No factories and no defaults.
    pub fn empty() -> Self {
        FactoryManager {
            factories: Vec::new(),
            defaults: BTreeMap::new(),
            fine_overrides: BTreeMap::new(),
            coarse_solver: None,
        }
    }

    /// The smoothed-aggregation pipeline configured from `o`.
    pub fn new(o: &MgOptions) -> Self {
        let mut m = FactoryManager::empty();
        let graph = m.register(CoalesceDropFactory { num_equations: o.num_equations, drop_tol: o.drop_tol });
        let aggs = m.register(AggregationFactory {
            kind: o.aggregation,
            min_agg_size: o.min_agg_size,
            max_agg_size: o.max_agg_size,
            max_selected_neighbors: o.max_selected_neighbors,
        });
        let nullspace = m.register(NullspaceFactory::new(o.num_equations));
        let tentative = m.register(TentativePFactory);
        let sa = m.register(SaPFactory {
            algorithm: o.algorithm,
            damping: o.sa_damping,
            eigen_iterations: o.eigen_iterations,
        });
        let trans = m.register(TransPFactory);
        let rap = m.register(RapFactory { fix_zero_diagonals: o.fix_zero_diagonals });
        let coords = m.register(CoordinatesTransferFactory);
        let smoother = m.register(SmootherFactory::from_options(o));

        m.set_factory(DataKey::A, rap);
        m.set_factory(DataKey::Graph, graph);
        m.set_factory(DataKey::Aggregates, aggs);
        m.set_factory(DataKey::Nullspace, tentative);
        m.set_fine_factory(DataKey::Nullspace, nullspace);
        m.set_factory(DataKey::Coordinates, coords);
        m.set_factory(DataKey::Ptent, tentative);
        m.set_factory(DataKey::P, sa);
        m.set_factory(DataKey::LambdaMax, sa);
        m.set_factory(DataKey::R, trans);
        m.set_factory(DataKey::Smoother, smoother);
        let coarse = match o.coarse_type {
            CoarseType::Direct => Some(m.register(DirectSolverFactory)),
            CoarseType::Smoother => Some(smoother),
            CoarseType::None => None,
        };
        m.set_coarse_solver(coarse);
        m
    }

    pub fn register<F: Factory + 'static>(&mut self, factory: F) -> FactoryId {
        self.factories.push(Arc::new(factory));
        FactoryId(self.factories.len() - 1)
    }

    pub fn factory(&self, id: FactoryId) -> Result<&Arc<dyn Factory>, MgError> {
        self.factories
            .get(id.0)
            .ok_or(MgError::OutOfRange { index: id.0, bound: self.factories.len() })
    }

    pub fn num_factories(&self) -> usize {
        self.factories.len()
    }

    pub fn set_factory(&mut self, key: DataKey, id: FactoryId) {
        self.defaults.insert(key, id);
    }

    /// Producer of `key` on level 0 only.
    pub fn set_fine_factory(&mut self, key: DataKey, id: FactoryId) {
        self.fine_overrides.insert(key, id);
    }

    /// Smoother producer for the coarsest level; `None` skips the coarse solve.
    pub fn set_coarse_solver(&mut self, id: Option<FactoryId>) {
        self.coarse_solver = id;
    }

    pub fn coarse_solver(&self) -> Option<FactoryId> {
        self.coarse_solver
    }

    /// Manager-level producer of `key` on `level`, ignoring per-level declarations.
    pub fn get_factory(&self, key: DataKey, level: usize) -> Option<FactoryId> {
        let fine = if level == 0 { self.fine_overrides.get(&key) } else { None };
        fine.or_else(|| self.defaults.get(&key)).copied()
    }

    /// Build steps that make `key` available on `level`, dependencies first.
    ///
    /// Empty when `key` is already present. Every `(home level, factory)` pair appears at
    /// most once. Optional inputs that cannot be resolved are left out.
    pub fn plan(&self, levels: &[Level], level: usize, key: DataKey) -> Result<Vec<Step>, MgError> {
        let mut p = Planner { manager: self, levels, marks: BTreeMap::new(), steps: Vec::new() };
        p.visit(level, key, None)?;
        Ok(p.steps)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

struct Planner<'a> {
    manager: &'a FactoryManager,
    levels: &'a [Level],
    marks: BTreeMap<(usize, FactoryId), Mark>,
    steps: Vec<Step>,
}

impl Planner<'_> {
    fn resolve(&self, level: usize, key: DataKey, pinned: Option<FactoryId>) -> Option<FactoryId> {
        pinned
            .or_else(|| self.levels.get(level).and_then(|l| l.declared_factory(key)))
            .or_else(|| self.manager.get_factory(key, level))
    }

    fn visit(&mut self, level: usize, key: DataKey, pinned: Option<FactoryId>) -> Result<(), MgError> {
        let levels = self.levels;
        if levels.get(level).is_some_and(|l| l.is_available(key)) {
            return Ok(());
        }
        let missing = MgError::MissingDependency { key, level };
        let id = self.resolve(level, key, pinned).ok_or_else(|| missing.clone())?;
        let factory = Arc::clone(self.manager.factory(id)?);
        let out = factory
            .outputs()
            .into_iter()
            .find(|o| o.key == key)
            .ok_or_else(|| missing.clone())?;
        let home = level.checked_sub(out.at.offset()).ok_or(missing)?;
        match self.marks.get(&(home, id)) {
            Some(Mark::Visiting) => return Err(MgError::CyclicDependency { key, level }),
            Some(Mark::Done) => return Ok(()),
            None => {}
        }
        self.marks.insert((home, id), Mark::Visiting);

        let placeholder;
        let home_level = match levels.get(home) {
            Some(l) => l,
            None => {
                placeholder = Level::new(home);
                &placeholder
            }
        };
        for input in factory.declare_inputs(home_level) {
            let at = home + input.at.offset();
            if input.optional {
                let (marks, n) = (self.marks.clone(), self.steps.len());
                match self.visit(at, input.key, input.factory) {
                    Err(MgError::MissingDependency { .. }) => {
                        self.marks = marks;
                        self.steps.truncate(n);
                    }
                    other => other?,
                }
            } else {
                self.visit(at, input.key, input.factory)?;
            }
        }
        self.marks.insert((home, id), Mark::Done);
        self.steps.push(Step { level: home, factory: id });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::gallery;
    use crate::multigrid::factory::{BuildContext, Input, Output};
    use crate::multigrid::level::{LevelValue, ReuseClass};
    use crate::parallel::SerialComm;

    fn fine_levels() -> Vec<Level> {
        let a = gallery::laplace_1d(10, Arc::new(SerialComm)).unwrap();
        let mut l = Level::new(0);
        l.set_user(DataKey::A, LevelValue::Operator(Arc::new(a))).unwrap();
        vec![l]
    }

    fn names(m: &FactoryManager, steps: &[Step]) -> Vec<(usize, String)> {
        steps
            .iter()
            .map(|s| (s.level, m.factory(s.factory).unwrap().name().to_string()))
            .collect()
    }

    #[test]
    fn prolongator_plan_orders_dependencies_first() {
        let m = FactoryManager::new(&MgOptions::default());
        let steps = m.plan(&fine_levels(), 0, DataKey::P).unwrap();
        let expected = [
            "CoalesceDropFactory",
            "AggregationFactory",
            "NullspaceFactory",
            "TentativePFactory",
            "SaPFactory",
        ];
        assert_eq!(names(&m, &steps), expected.iter().map(|n| (0, n.to_string())).collect::<Vec<_>>());
    }

    #[test]
    fn coarse_operator_is_homed_on_the_fine_level() {
        let m = FactoryManager::new(&MgOptions::default());
        let steps = m.plan(&fine_levels(), 1, DataKey::A).unwrap();
        let last = names(&m, &steps).pop().unwrap();
        assert_eq!(last, (0, "RapFactory".to_string()));
        // requested by SaP only, planned once
        assert_eq!(steps.iter().filter(|s| m.factory(s.factory).unwrap().name() == "TentativePFactory").count(), 1);
    }

    #[test]
    fn present_key_needs_no_steps() {
        let m = FactoryManager::new(&MgOptions::default());
        assert!(m.plan(&fine_levels(), 0, DataKey::A).unwrap().is_empty());
    }

    #[test]
    fn fine_operator_cannot_be_produced() {
        let m = FactoryManager::new(&MgOptions::default());
        let err = m.plan(&[Level::new(0)], 0, DataKey::A).unwrap_err();
        assert_eq!(err, MgError::MissingDependency { key: DataKey::A, level: 0 });
    }

    #[derive(Debug)]
    struct Needs {
        out: DataKey,
        input: DataKey,
    }

    impl Factory for Needs {
        fn name(&self) -> &str {
            "Needs"
        }
        fn declare_inputs(&self, _level: &Level) -> Vec<Input> {
            vec![Input::here(self.input)]
        }
        fn outputs(&self) -> Vec<Output> {
            vec![Output::here(self.out)]
        }
        fn reuse_class(&self) -> ReuseClass {
            ReuseClass::Values
        }
        fn build(&self, _ctx: &mut BuildContext<'_>) -> Result<(), MgError> {
            Ok(())
        }
    }

    #[test]
    fn mutual_dependency_is_a_cycle() {
        let mut m = FactoryManager::empty();
        let p = m.register(Needs { out: DataKey::P, input: DataKey::R });
        let r = m.register(Needs { out: DataKey::R, input: DataKey::P });
        m.set_factory(DataKey::P, p);
        m.set_factory(DataKey::R, r);
        let err = m.plan(&fine_levels(), 0, DataKey::P).unwrap_err();
        assert_eq!(err, MgError::CyclicDependency { key: DataKey::P, level: 0 });
    }

    #[test]
    fn level_declaration_overrides_the_manager() {
        let mut m = FactoryManager::new(&MgOptions::default());
        let custom = m.register(Needs { out: DataKey::Smoother, input: DataKey::A });
        let mut levels = fine_levels();
        levels[0].declare_input(DataKey::Smoother, custom);
        let steps = m.plan(&levels, 0, DataKey::Smoother).unwrap();
        assert_eq!(steps, vec![Step { level: 0, factory: custom }]);
    }

    #[test]
    fn coarse_solver_follows_the_coarse_type() {
        let direct = FactoryManager::new(&MgOptions::default());
        let id = direct.coarse_solver().unwrap();
        assert_eq!(direct.factory(id).unwrap().name(), "DirectSolverFactory");
        let none = FactoryManager::new(&MgOptions { coarse_type: CoarseType::None, ..Default::default() });
        assert_eq!(none.coarse_solver(), None);
    }
}
