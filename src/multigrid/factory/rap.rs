//! Galerkin coarse operator A_c = R·A·P.

use std::sync::Arc;

use log::{debug, warn};

use crate::core::traits::Operator;
use crate::error::MgError;
use crate::matrix::triple_product;
use crate::multigrid::factory::{BuildContext, Factory, Input, Output, Rel};
use crate::multigrid::level::{DataKey, Level, LevelValue, ReuseClass};

#[derive(Debug, Clone, Default)]
pub struct RapFactory {
    /// Put 1 on every zero diagonal entry of the coarse operator.
    pub fix_zero_diagonals: bool,
}

impl Factory for RapFactory {
    fn name(&self) -> &str {
        "RapFactory"
    }

    fn declare_inputs(&self, _level: &Level) -> Vec<Input> {
        vec![Input::here(DataKey::A), Input::here(DataKey::P), Input::here(DataKey::R)]
    }

    fn outputs(&self) -> Vec<Output> {
        vec![Output::coarser(DataKey::A)]
    }

    fn reuse_class(&self) -> ReuseClass {
        ReuseClass::Values
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> Result<(), MgError> {
        let a = ctx.matrix(DataKey::A)?;
        let p = ctx.matrix(DataKey::P)?;
        let r = ctx.matrix(DataKey::R)?;
        let mut ac = triple_product(&r, &a, &p)?.with_label(format!("A{}", ctx.level() + 1));

        let diag = ac.local_diag_copy()?;
        let start = ac.row_map().min_global();
        let zero_rows: Vec<usize> = (0..diag.len()).filter(|&i| diag[i] == 0.0).map(|i| start + i).collect();
        let zeros = ac.comm().all_reduce_sum_usize(zero_rows.len());
        if zeros > 0 {
            if self.fix_zero_diagonals {
                warn!("level {}: setting {zeros} zero diagonal entries of the coarse operator to 1", ctx.level() + 1);
                let domain = Arc::clone(ac.domain_map()?);
                let range = Arc::clone(ac.range_map()?);
                ac.resume_fill()?;
                for g in zero_rows {
                    ac.insert_global_values(g, &[g], &[1.0])?;
                }
                ac.fill_complete(domain, range)?;
            } else {
                warn!("level {}: coarse operator has {zeros} zero diagonal entries", ctx.level() + 1);
            }
        }
        debug!(
            "level {}: coarse operator {} rows, {} entries",
            ctx.level() + 1,
            ac.global_num_rows(),
            ac.global_num_entries()
        );
        ctx.set(DataKey::A, Rel::Coarser, LevelValue::Operator(Arc::new(ac)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{CrsMatrix, gallery, gather_dense, transpose};
    use crate::multigrid::factory::FactoryId;
    use crate::parallel::{Map, SerialComm};
    use approx::assert_abs_diff_eq;

    fn run(a: CrsMatrix, p: CrsMatrix, fix: bool) -> Vec<Level> {
        let r = transpose(&p).unwrap();
        let mut levels = vec![Level::new(0)];
        levels[0].set_user(DataKey::A, LevelValue::Operator(Arc::new(a))).unwrap();
        levels[0].set_user(DataKey::P, LevelValue::Transfer(Arc::new(p))).unwrap();
        levels[0].set_user(DataKey::R, LevelValue::Transfer(Arc::new(r))).unwrap();
        let f = RapFactory { fix_zero_diagonals: fix };
        f.build(&mut BuildContext::new(&mut levels, 0, FactoryId(0), &f)).unwrap();
        levels
    }

    #[test]
    fn galerkin_product_of_piecewise_constant_interpolation() {
        let comm = Arc::new(SerialComm);
        let a = gallery::laplace_1d(6, comm.clone()).unwrap();
        let fine = Arc::clone(a.row_map());
        let coarse = Arc::new(Map::uniform(3, comm));
        let rows = (0..6).map(|g| vec![(g / 2, 1.0)]).collect();
        let p = CrsMatrix::from_global_rows(fine.clone(), rows, coarse, fine).unwrap();
        let levels = run(a, p, false);
        let ac = levels[1].matrix(DataKey::A).unwrap();
        assert_eq!(ac.label_str(), "A1");
        let d = gather_dense(ac).unwrap();
        let expected = [[2.0, -1.0, 0.0], [-1.0, 2.0, -1.0], [0.0, -1.0, 2.0]];
        for i in 0..3 {
            for j in 0..3 {
                assert_abs_diff_eq!(d[(i, j)], expected[i][j], epsilon = 1e-14);
            }
        }
    }

    #[test]
    fn zero_diagonals_are_fixed_on_request() {
        let comm = Arc::new(SerialComm);
        let map = Arc::new(Map::uniform(2, comm));
        let swap = || {
            CrsMatrix::from_global_rows(map.clone(), vec![vec![(1, 1.0)], vec![(0, 1.0)]], map.clone(), map.clone())
                .unwrap()
        };
        let ident = || {
            CrsMatrix::from_global_rows(map.clone(), vec![vec![(0, 1.0)], vec![(1, 1.0)]], map.clone(), map.clone())
                .unwrap()
        };
        let kept = run(swap(), ident(), false);
        assert_eq!(kept[1].matrix(DataKey::A).unwrap().local_diag_copy().unwrap(), vec![0.0, 0.0]);
        let fixed = run(swap(), ident(), true);
        assert_eq!(fixed[1].matrix(DataKey::A).unwrap().local_diag_copy().unwrap(), vec![1.0, 1.0]);
    }
}
