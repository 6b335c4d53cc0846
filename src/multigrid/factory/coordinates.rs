use std::sync::Arc;

use faer::Mat;

use crate::core::vector::MultiVector;
use crate::error::MgError;
use crate::multigrid::factory::{BuildContext, Factory, Input, Output, Rel};
use crate::multigrid::level::{DataKey, Level, LevelValue, ReuseClass};

/// Coarse node coordinates as the centroid of each aggregate.
///
/// Coordinates are per node (one row per graph node, one column per dimension). Without
/// fine coordinates nothing is produced.
#[derive(Debug, Clone, Default)]
pub struct CoordinatesTransferFactory;

impl Factory for CoordinatesTransferFactory {
    fn name(&self) -> &str {
        "CoordinatesTransferFactory"
    }

    fn declare_inputs(&self, _level: &Level) -> Vec<Input> {
        vec![Input::here(DataKey::Aggregates), Input::here(DataKey::Coordinates).optional()]
    }

    fn outputs(&self) -> Vec<Output> {
        vec![Output::coarser(DataKey::Coordinates).optional()]
    }

    fn reuse_class(&self) -> ReuseClass {
        ReuseClass::Structure
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> Result<(), MgError> {
        if !ctx.is_available(DataKey::Coordinates) {
            return Ok(());
        }
        let aggs = ctx.aggregates()?;
        let coords = ctx.vectors(DataKey::Coordinates)?;
        if coords.local_len() != aggs.node_map().local_len() {
            return Err(ctx.fail(format!(
                "{} coordinate rows for {} graph nodes",
                coords.local_len(),
                aggs.node_map().local_len()
            )));
        }
        let dim = coords.num_vectors();
        let members = aggs.members();
        let centroids = Mat::from_fn(members.len(), dim, |a, d| {
            let nodes = &members[a];
            nodes.iter().map(|&n| coords.get(n, d)).sum::<f64>() / nodes.len() as f64
        });
        let coarse = MultiVector::from_local(Arc::clone(aggs.agg_map()), centroids)?;
        ctx.set(DataKey::Coordinates, Rel::Coarser, LevelValue::VectorSet(Arc::new(coarse)))
    }
}
