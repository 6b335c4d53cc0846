//! Integration tests for multigrid hierarchy construction.
//!
//! These exercise the factory pipeline end to end: coarsening on several ranks, the
//! single-level shortcut, transfer operator consistency, memoized requests, dependency
//! cycles, reuse policies and the error kinds setup reports.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use approx::assert_relative_eq;
use mulgrid::config::{MgOptions, ReuseType, SmootherType};
use mulgrid::core::{DistVector, Operator};
use mulgrid::error::MgError;
use mulgrid::matrix::{CrsMatrix, gallery, gather_dense};
use mulgrid::multigrid::factory::{
    AggregationFactory, NullspaceFactory, RapFactory, SaPFactory, TentativePFactory, TransPFactory,
};
use mulgrid::multigrid::{
    BuildContext, DataKey, Factory, FactoryManager, Hierarchy, HierarchyState, Input, Level, LevelValue, Output,
    ReuseClass,
};
use mulgrid::parallel::{Comm, Map, SerialComm, ThreadComm};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn laplace(n: usize) -> Arc<CrsMatrix> {
    Arc::new(gallery::laplace_1d(n, Arc::new(SerialComm)).unwrap())
}

fn opts(coarse_max_size: usize) -> MgOptions {
    MgOptions { coarse_max_size, ..Default::default() }
}

/// Delegates to `inner`, counting builds.
#[derive(Debug)]
struct Counted<F> {
    inner: F,
    runs: Arc<AtomicUsize>,
}

impl<F: Factory> Factory for Counted<F> {
    fn name(&self) -> &str {
        self.inner.name()
    }
    fn declare_inputs(&self, level: &Level) -> Vec<Input> {
        self.inner.declare_inputs(level)
    }
    fn outputs(&self) -> Vec<Output> {
        self.inner.outputs()
    }
    fn reuse_class(&self) -> ReuseClass {
        self.inner.reuse_class()
    }
    fn build(&self, ctx: &mut BuildContext<'_>) -> Result<(), MgError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.inner.build(ctx)
    }
}

fn counted<F: Factory + 'static>(m: &mut FactoryManager, key: DataKey, inner: F, runs: &Arc<AtomicUsize>) {
    let id = m.register(Counted { inner, runs: Arc::clone(runs) });
    m.set_factory(key, id);
}

#[test]
fn poisson_1d_on_three_ranks() {
    let results = ThreadComm::run(3, |comm| {
        let a = Arc::new(gallery::laplace_1d(1000, comm).unwrap());
        let mut h = Hierarchy::from_options(opts(50));
        h.set_fine_operator(Arc::clone(&a)).unwrap();
        let report = h.setup().unwrap();
        let b = DistVector::from_global_fn(Arc::clone(a.row_map()), |_| 1.0);
        let mut x = DistVector::zeros(Arc::clone(a.row_map()));
        let stats = h.iterate(&b, &mut x, 5, 0.0).unwrap();
        (report, stats.residual_history)
    });
    let (report, history) = &results[0];
    for other in &results[1..] {
        assert_eq!(&other.0, report);
        assert_eq!(&other.1, history);
    }
    assert!(report.num_levels >= 2);
    assert!(*report.rows.last().unwrap() <= 50);
    assert!(report.truncated.is_none());
    assert_eq!(history.len(), 6);
    for w in history.windows(2) {
        assert!(w[1] <= 0.5 * w[0], "residual {} -> {}", w[0], w[1]);
    }
}

#[test]
fn small_operator_runs_no_transfer_factory() {
    let o = opts(50);
    let runs = Arc::new(AtomicUsize::new(0));
    let mut m = FactoryManager::new(&o);
    counted(&mut m, DataKey::Ptent, TentativePFactory, &runs);
    counted(&mut m, DataKey::P, SaPFactory::default(), &runs);
    counted(&mut m, DataKey::R, TransPFactory, &runs);
    counted(&mut m, DataKey::A, RapFactory { fix_zero_diagonals: false }, &runs);
    let mut h = Hierarchy::new(Arc::new(m), o);
    h.set_fine_operator(laplace(10)).unwrap();
    let report = h.setup().unwrap();
    assert_eq!(report.num_levels, 1);
    assert_eq!(report.operator_complexity, 1.0);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(h.level(0).unwrap().smoother().unwrap().name(), "direct LU");
}

#[test]
fn operator_complexity_cap_stops_coarsening() {
    let mut free = Hierarchy::from_options(opts(4));
    free.set_fine_operator(laplace(300)).unwrap();
    let full = free.setup().unwrap();
    assert!(full.num_levels >= 3);

    // any cap below the first coarse level's contribution leaves two levels
    let cap = MgOptions { max_operator_complexity: 1.0 + 1e-9, ..opts(4) };
    let mut h = Hierarchy::from_options(cap);
    h.set_fine_operator(laplace(300)).unwrap();
    let report = h.setup().unwrap();
    assert_eq!(report.num_levels, 2);
    assert!(report.truncated.is_none());
    assert!(report.operator_complexity < full.operator_complexity);
}

#[test]
fn restrictor_is_the_transpose_of_the_prolongator() {
    let results = ThreadComm::run(2, |comm| {
        let rank = comm.rank();
        let a = Arc::new(gallery::laplace_1d(200, comm).unwrap());
        let mut h = Hierarchy::from_options(opts(20));
        h.set_fine_operator(a).unwrap();
        h.setup().unwrap();
        let l0 = h.level(0).unwrap();
        let p = l0.matrix(DataKey::P).unwrap();
        let r = l0.matrix(DataKey::R).unwrap();

        let mut rng = StdRng::seed_from_u64(17 + rank as u64);
        let coarse = Arc::clone(p.domain_map().unwrap());
        let fine = Arc::clone(p.range_map().unwrap());
        let xc = DistVector::from_local(
            Arc::clone(&coarse),
            (0..coarse.local_len()).map(|_| rng.gen_range(-1.0..1.0)).collect(),
        )
        .unwrap();
        let y = DistVector::from_local(
            Arc::clone(&fine),
            (0..fine.local_len()).map(|_| rng.gen_range(-1.0..1.0)).collect(),
        )
        .unwrap();
        let mut px = DistVector::zeros(Arc::clone(&fine));
        p.matvec(&xc, &mut px).unwrap();
        let mut ry = DistVector::zeros(Arc::clone(&coarse));
        r.matvec(&y, &mut ry).unwrap();

        let pd = gather_dense(p).unwrap();
        let rd = gather_dense(r).unwrap();
        let exact = rd.nrows() == pd.ncols()
            && rd.ncols() == pd.nrows()
            && (0..rd.nrows()).all(|i| (0..rd.ncols()).all(|j| rd[(i, j)] == pd[(j, i)]));
        (y.dot(&px), ry.dot(&xc), exact)
    });
    for (lhs, rhs, exact) in results {
        assert!(exact);
        assert_relative_eq!(lhs, rhs, max_relative = 1e-12);
    }
}

#[test]
fn repeated_requests_build_once() {
    let o = opts(10);
    let runs = Arc::new(AtomicUsize::new(0));
    let mut m = FactoryManager::new(&o);
    counted(&mut m, DataKey::Aggregates, AggregationFactory::default(), &runs);
    let mut h = Hierarchy::new(Arc::new(m), o);
    h.set_fine_operator(laplace(60)).unwrap();
    let first = h.get(0, DataKey::P).unwrap();
    let second = h.get(0, DataKey::P).unwrap();
    assert!(first.ptr_eq(&second));
    assert!(matches!(h.get(0, DataKey::Aggregates).unwrap(), LevelValue::Aggregates(_)));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(h.state(), HierarchyState::Building);
}

#[derive(Debug)]
struct Loop {
    out: DataKey,
    needs: DataKey,
}

impl Factory for Loop {
    fn name(&self) -> &str {
        "Loop"
    }
    fn declare_inputs(&self, _level: &Level) -> Vec<Input> {
        vec![Input::here(self.needs)]
    }
    fn outputs(&self) -> Vec<Output> {
        vec![Output::here(self.out)]
    }
    fn reuse_class(&self) -> ReuseClass {
        ReuseClass::Transfer
    }
    fn build(&self, _ctx: &mut BuildContext<'_>) -> Result<(), MgError> {
        Ok(())
    }
}

#[test]
fn dependency_cycle_is_reported() {
    let o = opts(10);
    let mut m = FactoryManager::new(&o);
    let p = m.register(Loop { out: DataKey::P, needs: DataKey::R });
    let r = m.register(Loop { out: DataKey::R, needs: DataKey::P });
    m.set_factory(DataKey::P, p);
    m.set_factory(DataKey::R, r);
    let mut h = Hierarchy::new(Arc::new(m), o);
    h.set_fine_operator(laplace(100)).unwrap();
    assert_eq!(h.get(0, DataKey::P).unwrap_err(), MgError::CyclicDependency { key: DataKey::P, level: 0 });
    // the cycle is fatal, not a truncation
    assert_eq!(h.setup().unwrap_err(), MgError::CyclicDependency { key: DataKey::P, level: 0 });
}

fn scaled(a: &CrsMatrix, alpha: f64) -> Arc<CrsMatrix> {
    let mut b = a.clone();
    b.scale(alpha);
    Arc::new(b)
}

fn apply(a: &CrsMatrix, v: &DistVector) -> Vec<f64> {
    let mut y = DistVector::zeros(Arc::clone(a.row_map()));
    a.matvec(v, &mut y).unwrap();
    y.into_local()
}

#[test]
fn reuse_keeps_transfers_and_rebuilds_coarse_operators() {
    let a = laplace(300);
    let mut h = Hierarchy::from_options(opts(20));
    h.set_fine_operator(Arc::clone(&a)).unwrap();
    h.setup().unwrap();
    let h2 = h.reuse(scaled(&a, 2.0)).unwrap();
    assert_eq!(h2.state(), HierarchyState::Ready);
    assert_eq!(h2.num_levels(), h.num_levels());
    for k in 0..h.num_levels() - 1 {
        let (old, new) = (h.level(k).unwrap(), h2.level(k).unwrap());
        assert!(old.get(DataKey::P).unwrap().ptr_eq(new.get(DataKey::P).unwrap()));
        assert!(old.get(DataKey::R).unwrap().ptr_eq(new.get(DataKey::R).unwrap()));
        assert!(!old.get(DataKey::Smoother).unwrap().ptr_eq(new.get(DataKey::Smoother).unwrap()));
    }
    let a1 = h.level(1).unwrap().matrix(DataKey::A).unwrap();
    let b1 = h2.level(1).unwrap().matrix(DataKey::A).unwrap();
    assert!(!Arc::ptr_eq(a1, b1));
    let v = DistVector::from_global_fn(Arc::clone(a1.row_map()), |g| (g as f64 * 0.3).cos());
    for (x, y) in apply(a1, &v).iter().zip(apply(b1, &v)) {
        assert_relative_eq!(2.0 * x, y, epsilon = 1e-12);
    }
}

fn tridiag(n: usize, diag: f64) -> Arc<CrsMatrix> {
    let map = Arc::new(Map::uniform(n, Arc::new(SerialComm)));
    let rows = map
        .local_range()
        .map(|g| {
            let mut r = vec![(g, diag)];
            if g > 0 {
                r.push((g - 1, -1.0));
            }
            if g + 1 < n {
                r.push((g + 1, -1.0));
            }
            r
        })
        .collect();
    Arc::new(CrsMatrix::from_global_rows(Arc::clone(&map), rows, Arc::clone(&map), map).unwrap())
}

#[test]
fn reuse_with_chebyshev_follows_the_new_spectrum() {
    let o = MgOptions { smoother: SmootherType::Chebyshev, ..opts(20) };
    let mut h = Hierarchy::from_options(o.clone());
    h.set_fine_operator(tridiag(400, 4.0)).unwrap();
    h.setup().unwrap();
    assert!(h.level(0).unwrap().is_available(DataKey::LambdaMax));

    let laplacian = tridiag(400, 2.0);
    let reused = h.reuse(Arc::clone(&laplacian)).unwrap();
    assert!(h.level(0).unwrap().get(DataKey::P).unwrap().ptr_eq(reused.level(0).unwrap().get(DataKey::P).unwrap()));
    assert!(!reused.level(0).unwrap().is_available(DataKey::LambdaMax));

    let mut fresh = Hierarchy::from_options(o);
    fresh.set_fine_operator(Arc::clone(&laplacian)).unwrap();
    fresh.setup().unwrap();

    let b = DistVector::from_global_fn(Arc::clone(laplacian.row_map()), |g| ((g % 13) as f64).sin());
    let run = |hier: &Hierarchy| {
        let mut x = DistVector::zeros(Arc::clone(laplacian.row_map()));
        hier.iterate(&b, &mut x, 20, 0.0).unwrap()
    };
    let (r_reused, r_fresh) = (run(&reused), run(&fresh));
    assert!(r_reused.final_residual.is_finite());
    assert!(r_reused.final_residual < 1e-3 * r_reused.residual_history[0]);
    assert!(r_reused.final_residual <= 10.0 * r_fresh.final_residual + 1e-12);
}

#[test]
fn tentative_reuse_recomputes_the_smoothed_prolongator() {
    let a = laplace(300);
    let mut h = Hierarchy::from_options(MgOptions { reuse: ReuseType::TentativeP, ..opts(20) });
    h.set_fine_operator(Arc::clone(&a)).unwrap();
    h.setup().unwrap();
    let h2 = h.reuse(scaled(&a, 3.0)).unwrap();
    let (old, new) = (h.level(0).unwrap(), h2.level(0).unwrap());
    assert!(old.get(DataKey::Ptent).unwrap().ptr_eq(new.get(DataKey::Ptent).unwrap()));
    assert!(old.get(DataKey::Aggregates).unwrap().ptr_eq(new.get(DataKey::Aggregates).unwrap()));
    assert!(!old.get(DataKey::P).unwrap().ptr_eq(new.get(DataKey::P).unwrap()));
    // D⁻¹A is unchanged by scaling, so the smoothed prolongator is too
    let p = old.matrix(DataKey::P).unwrap();
    let q = new.matrix(DataKey::P).unwrap();
    let v = DistVector::from_global_fn(Arc::clone(p.domain_map().unwrap()), |g| 1.0 + g as f64);
    for (x, y) in apply(p, &v).iter().zip(apply(q, &v)) {
        assert_relative_eq!(*x, y, epsilon = 1e-10);
    }
}

#[test]
fn reuse_none_starts_from_scratch() {
    let a = laplace(120);
    let mut h = Hierarchy::from_options(MgOptions { reuse: ReuseType::None, ..opts(10) });
    h.set_fine_operator(Arc::clone(&a)).unwrap();
    h.setup().unwrap();
    let h2 = h.reuse(Arc::clone(&a)).unwrap();
    assert_eq!(h2.num_levels(), h.num_levels());
    let (old, new) = (h.level(0).unwrap(), h2.level(0).unwrap());
    assert!(!old.get(DataKey::Aggregates).unwrap().ptr_eq(new.get(DataKey::Aggregates).unwrap()));
}

#[test]
fn setup_error_kinds() {
    let comm: Arc<dyn Comm> = Arc::new(SerialComm);
    let rows = Arc::new(Map::uniform(4, Arc::clone(&comm)));
    let cols = Arc::new(Map::uniform(6, Arc::clone(&comm)));
    let rect = CrsMatrix::from_global_rows(
        Arc::clone(&rows),
        (0..4).map(|i| vec![(i, 1.0), (i + 2, 1.0)]).collect(),
        cols,
        Arc::clone(&rows),
    )
    .unwrap();
    let mut h = Hierarchy::from_options(MgOptions::default());
    assert!(matches!(h.set_fine_operator(Arc::new(rect)), Err(MgError::DimensionMismatch(_))));
    assert!(matches!(
        h.set_fine_operator(Arc::new(CrsMatrix::new(Arc::clone(&rows)))),
        Err(MgError::NotReady(_))
    ));

    h.set_fine_operator(laplace(50)).unwrap();
    let b = DistVector::zeros(Arc::clone(h.fine_operator().unwrap().row_map()));
    let mut x = b.clone();
    assert!(matches!(h.iterate(&b, &mut x, 1, 0.0), Err(MgError::NotReady(_))));

    let mut bare = Hierarchy::new(Arc::new(FactoryManager::empty()), opts(5));
    bare.set_fine_operator(laplace(50)).unwrap();
    assert_eq!(bare.setup().unwrap_err(), MgError::MissingDependency { key: DataKey::P, level: 0 });
}

#[test]
fn singleton_aggregates_stall_and_keep_the_fine_level() {
    let results = ThreadComm::run(4, |comm| {
        let a = Arc::new(gallery::laplace_1d(4, comm).unwrap());
        let mut h = Hierarchy::from_options(opts(1));
        h.set_fine_operator(Arc::clone(&a)).unwrap();
        let report = h.setup().unwrap();
        let fine = h.level(0).unwrap();
        assert!(!fine.is_available(DataKey::P));
        assert_eq!(fine.smoother().unwrap().name(), "direct LU");

        let b = DistVector::from_global_fn(Arc::clone(a.row_map()), |g| 1.0 + g as f64);
        let mut x = DistVector::zeros(Arc::clone(a.row_map()));
        let stats = h.iterate(&b, &mut x, 1, 1e-10).unwrap();
        (report.num_levels, report.truncated, stats.converged)
    });
    for (levels, truncated, converged) in results {
        assert_eq!(levels, 1);
        assert_eq!(truncated, Some(MgError::StallDetected { level: 0, fine_rows: 4, coarse_rows: 4 }));
        assert!(converged);
    }
}

#[test]
fn failed_factory_truncates_the_hierarchy() {
    let o = opts(5);
    let mut m = FactoryManager::new(&o);
    let broken = m.register(NullspaceFactory::new(0));
    m.set_fine_factory(DataKey::Nullspace, broken);
    let mut h = Hierarchy::new(Arc::new(m), o);
    h.set_fine_operator(laplace(80)).unwrap();
    let report = h.setup().unwrap();
    assert_eq!(report.num_levels, 1);
    assert!(matches!(report.truncated, Some(MgError::BuildFailed { level: 0, .. })));
    let fine = h.level(0).unwrap();
    assert!(!fine.is_available(DataKey::P));
    assert!(!fine.is_available(DataKey::Aggregates));
    assert_eq!(fine.smoother().unwrap().name(), "direct LU");
    assert!(matches!(h.get(3, DataKey::A), Err(MgError::OutOfRange { index: 3, .. })));
}
