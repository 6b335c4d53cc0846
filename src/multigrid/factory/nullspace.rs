use std::sync::Arc;

use crate::core::vector::MultiVector;
use crate::error::MgError;
use crate::multigrid::factory::{BuildContext, Factory, Input, Output, Rel};
use crate::multigrid::level::{DataKey, Level, LevelValue, ReuseClass};

/// Default fine-level near-nullspace: one constant vector per PDE equation.
///
/// Vector `j` is 1 on every dof `g` with `g % num_equations == j`, 0 elsewhere. Only
/// consulted when the caller supplied no nullspace.
#[derive(Debug, Clone)]
pub struct NullspaceFactory {
    pub num_equations: usize,
}

impl NullspaceFactory {
    pub fn new(num_equations: usize) -> Self {
        NullspaceFactory { num_equations }
    }
}

impl Factory for NullspaceFactory {
    fn name(&self) -> &str {
        "NullspaceFactory"
    }

    fn declare_inputs(&self, _level: &Level) -> Vec<Input> {
        vec![Input::here(DataKey::A)]
    }

    fn outputs(&self) -> Vec<Output> {
        vec![Output::here(DataKey::Nullspace)]
    }

    fn reuse_class(&self) -> ReuseClass {
        ReuseClass::Structure
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> Result<(), MgError> {
        if self.num_equations == 0 {
            return Err(ctx.fail("number of equations must be at least 1"));
        }
        let a = ctx.matrix(DataKey::A)?;
        let k = self.num_equations;
        let ns = MultiVector::from_global_fn(Arc::clone(a.row_map()), k, |g, j| if g % k == j { 1.0 } else { 0.0 });
        ctx.set(DataKey::Nullspace, Rel::Here, LevelValue::VectorSet(Arc::new(ns)))
    }
}
