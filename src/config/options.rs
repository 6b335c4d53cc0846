//! Typed multigrid options read from a [`ParameterList`].
//!
//! `MgOptions::from_params` reads every recognized key once. Unrecognized keys are
//! logged and ignored; a recognized key with the wrong type or an unknown value is an
//! [`MgError::InvalidParameter`].

use log::warn;

use super::params::ParameterList;
use crate::error::MgError;

/// How the coarsest level is solved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoarseType {
    /// Gathered dense LU, replicated on every rank.
    Direct,
    /// The level smoother applied on the coarsest level.
    Smoother,
    /// No coarse correction at all.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    SmoothedAggregation,
    Unsmoothed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationType {
    Uncoupled,
    Pairwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmootherType {
    Jacobi,
    GaussSeidel,
    SymmetricGaussSeidel,
    Chebyshev,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmootherPlacement {
    Both,
    Pre,
    Post,
    None,
}

impl SmootherPlacement {
    pub fn pre(self) -> bool {
        matches!(self, SmootherPlacement::Both | SmootherPlacement::Pre)
    }

    pub fn post(self) -> bool {
        matches!(self, SmootherPlacement::Both | SmootherPlacement::Post)
    }
}

/// Number of coarse-grid visits per level: V = 1, W = 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleType {
    #[default]
    V,
    W,
}

impl CycleType {
    pub fn mu(self) -> usize {
        match self {
            CycleType::V => 1,
            CycleType::W => 2,
        }
    }
}

/// Which setup products survive a [`crate::multigrid::Hierarchy::reuse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReuseType {
    /// Rebuild everything.
    None,
    /// Keep graph, aggregates, nullspace and the tentative prolongator.
    TentativeP,
    /// Additionally keep the smoothed prolongator and restrictor.
    Rp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MgOptions {
    pub max_levels: usize,
    pub coarse_max_size: usize,
    /// Stop coarsening once the operator complexity reaches this value.
    pub max_operator_complexity: f64,
    pub coarse_type: CoarseType,
    pub num_equations: usize,
    pub algorithm: Algorithm,
    pub sa_damping: f64,
    pub eigen_iterations: usize,
    pub aggregation: AggregationType,
    pub drop_tol: f64,
    pub min_agg_size: usize,
    pub max_agg_size: usize,
    pub max_selected_neighbors: usize,
    pub smoother: SmootherType,
    pub sweeps: usize,
    pub smoother_damping: f64,
    pub placement: SmootherPlacement,
    pub chebyshev_degree: usize,
    pub chebyshev_ratio: f64,
    pub cycle: CycleType,
    pub reuse: ReuseType,
    pub fix_zero_diagonals: bool,
}

impl Default for MgOptions {
    fn default() -> Self {
        MgOptions {
            max_levels: 10,
            coarse_max_size: 2000,
            max_operator_complexity: f64::INFINITY,
            coarse_type: CoarseType::Direct,
            num_equations: 1,
            algorithm: Algorithm::SmoothedAggregation,
            sa_damping: 4.0 / 3.0,
            eigen_iterations: 10,
            aggregation: AggregationType::Uncoupled,
            drop_tol: 0.0,
            min_agg_size: 2,
            max_agg_size: 1 << 31,
            max_selected_neighbors: 0,
            smoother: SmootherType::SymmetricGaussSeidel,
            sweeps: 1,
            smoother_damping: 1.0,
            placement: SmootherPlacement::Both,
            chebyshev_degree: 2,
            chebyshev_ratio: 30.0,
            cycle: CycleType::V,
            reuse: ReuseType::Rp,
            fix_zero_diagonals: false,
        }
    }
}

pub const KNOWN_KEYS: &[&str] = &[
    "max levels",
    "coarse: max size",
    "coarse: type",
    "coarse: max operator complexity",
    "number of equations",
    "multigrid algorithm",
    "sa: damping factor",
    "sa: eigenvalue estimate num iterations",
    "aggregation: type",
    "aggregation: drop tol",
    "aggregation: min agg size",
    "aggregation: max agg size",
    "aggregation: max selected neighbors",
    "smoother: type",
    "smoother: sweeps",
    "smoother: damping factor",
    "smoother: pre or post",
    "chebyshev: degree",
    "chebyshev: ratio eigenvalue",
    "cycle type",
    "reuse: type",
    "rap: fix zero diagonals",
];

fn invalid(key: &str, reason: impl Into<String>) -> MgError {
    MgError::InvalidParameter { key: key.to_string(), reason: reason.into() }
}

/// Map a string option onto one of `choices`.
fn choice<T: Copy>(p: &ParameterList, key: &str, default: T, choices: &[(&str, T)]) -> Result<T, MgError> {
    let Some(s) = p.get::<String>(key)? else {
        return Ok(default);
    };
    choices
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(&s))
        .map(|&(_, v)| v)
        .ok_or_else(|| {
            let names: Vec<_> = choices.iter().map(|(n, _)| *n).collect();
            invalid(key, format!("\"{s}\" is not one of {names:?}"))
        })
}

fn positive(p: &ParameterList, key: &str, default: usize) -> Result<usize, MgError> {
    let v = p.get_or(key, default)?;
    if v == 0 {
        return Err(invalid(key, "must be at least 1"));
    }
    Ok(v)
}

impl MgOptions {
    pub fn from_params(p: &ParameterList) -> Result<Self, MgError> {
        for key in p.unrecognized(KNOWN_KEYS) {
            warn!("ignoring unrecognized parameter \"{key}\"");
        }
        let d = MgOptions::default();
        let opts = MgOptions {
            max_levels: positive(p, "max levels", d.max_levels)?,
            coarse_max_size: p.get_or("coarse: max size", d.coarse_max_size)?,
            max_operator_complexity: p.get_or("coarse: max operator complexity", d.max_operator_complexity)?,
            coarse_type: choice(
                p,
                "coarse: type",
                d.coarse_type,
                &[("direct", CoarseType::Direct), ("smoother", CoarseType::Smoother), ("none", CoarseType::None)],
            )?,
            num_equations: positive(p, "number of equations", d.num_equations)?,
            algorithm: choice(
                p,
                "multigrid algorithm",
                d.algorithm,
                &[("sa", Algorithm::SmoothedAggregation), ("unsmoothed", Algorithm::Unsmoothed)],
            )?,
            sa_damping: p.get_or("sa: damping factor", d.sa_damping)?,
            eigen_iterations: positive(p, "sa: eigenvalue estimate num iterations", d.eigen_iterations)?,
            aggregation: choice(
                p,
                "aggregation: type",
                d.aggregation,
                &[("uncoupled", AggregationType::Uncoupled), ("pairwise", AggregationType::Pairwise)],
            )?,
            drop_tol: p.get_or("aggregation: drop tol", d.drop_tol)?,
            min_agg_size: positive(p, "aggregation: min agg size", d.min_agg_size)?,
            max_agg_size: positive(p, "aggregation: max agg size", d.max_agg_size)?,
            max_selected_neighbors: p.get_or("aggregation: max selected neighbors", d.max_selected_neighbors)?,
            smoother: choice(
                p,
                "smoother: type",
                d.smoother,
                &[
                    ("jacobi", SmootherType::Jacobi),
                    ("gauss-seidel", SmootherType::GaussSeidel),
                    ("symmetric gauss-seidel", SmootherType::SymmetricGaussSeidel),
                    ("chebyshev", SmootherType::Chebyshev),
                ],
            )?,
            sweeps: positive(p, "smoother: sweeps", d.sweeps)?,
            smoother_damping: p.get_or("smoother: damping factor", d.smoother_damping)?,
            placement: choice(
                p,
                "smoother: pre or post",
                d.placement,
                &[
                    ("both", SmootherPlacement::Both),
                    ("pre", SmootherPlacement::Pre),
                    ("post", SmootherPlacement::Post),
                    ("none", SmootherPlacement::None),
                ],
            )?,
            chebyshev_degree: positive(p, "chebyshev: degree", d.chebyshev_degree)?,
            chebyshev_ratio: p.get_or("chebyshev: ratio eigenvalue", d.chebyshev_ratio)?,
            cycle: choice(p, "cycle type", d.cycle, &[("V", CycleType::V), ("W", CycleType::W)])?,
            reuse: choice(
                p,
                "reuse: type",
                d.reuse,
                &[("none", ReuseType::None), ("tP", ReuseType::TentativeP), ("RP", ReuseType::Rp)],
            )?,
            fix_zero_diagonals: p.get_or("rap: fix zero diagonals", d.fix_zero_diagonals)?,
        };
        if opts.min_agg_size > opts.max_agg_size {
            return Err(invalid("aggregation: min agg size", "exceeds the maximum aggregate size"));
        }
        if !(opts.drop_tol >= 0.0) {
            return Err(invalid("aggregation: drop tol", "must be non-negative"));
        }
        if !(opts.max_operator_complexity >= 1.0) {
            return Err(invalid("coarse: max operator complexity", "must be at least 1"));
        }
        if !(opts.smoother_damping > 0.0) {
            return Err(invalid("smoother: damping factor", "must be positive"));
        }
        if !(opts.chebyshev_ratio > 1.0) {
            return Err(invalid("chebyshev: ratio eigenvalue", "must exceed 1"));
        }
        Ok(opts)
    }
}
