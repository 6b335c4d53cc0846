use std::sync::Arc;

use crate::error::MgError;
use crate::matrix::transpose;
use crate::multigrid::factory::{BuildContext, Factory, Input, Output, Rel};
use crate::multigrid::level::{DataKey, Level, LevelValue, ReuseClass};

/// Restriction as the explicit transpose of the prolongator.
#[derive(Debug, Clone, Default)]
pub struct TransPFactory;

impl Factory for TransPFactory {
    fn name(&self) -> &str {
        "TransPFactory"
    }

    fn declare_inputs(&self, _level: &Level) -> Vec<Input> {
        vec![Input::here(DataKey::P)]
    }

    fn outputs(&self) -> Vec<Output> {
        vec![Output::here(DataKey::R)]
    }

    fn reuse_class(&self) -> ReuseClass {
        ReuseClass::Transfer
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> Result<(), MgError> {
        let p = ctx.matrix(DataKey::P)?;
        let r = transpose(&p)?.with_label(format!("R{}", ctx.level()));
        ctx.set(DataKey::R, Rel::Here, LevelValue::Transfer(Arc::new(r)))
    }
}
