//! Preconditioner entry points: build a multigrid preconditioner from an operator and a
//! parameter list, and rebuild it for a new operator with the same sparsity.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use mulgrid::config::ParameterList;
//! use mulgrid::context::{create_preconditioner, UserData};
//! use mulgrid::matrix::gallery;
//! use mulgrid::parallel::SerialComm;
//!
//! let a = Arc::new(gallery::laplace_1d(400, Arc::new(SerialComm)).unwrap());
//! let params = ParameterList::new().with("coarse: max size", 20_i64);
//! let pc = create_preconditioner(a, &params, UserData::default()).unwrap();
//! assert!(pc.hierarchy().num_levels() > 1);
//! ```

use std::sync::Arc;

use log::info;

use crate::config::{MgOptions, ParameterList};
use crate::core::vector::MultiVector;
use crate::error::MgError;
use crate::matrix::CrsMatrix;
use crate::multigrid::{DataKey, Hierarchy, LevelValue, MgPreconditioner};

/// Optional fine-level data supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct UserData {
    /// Near-nullspace vectors on the row map of `A`; the constant per equation if absent.
    pub nullspace: Option<Arc<MultiVector>>,
    /// Node coordinates, one row per node.
    pub coordinates: Option<Arc<MultiVector>>,
}

/// Collective: set up a multigrid hierarchy for `a` and wrap it as a preconditioner.
pub fn create_preconditioner(
    a: Arc<CrsMatrix>,
    params: &ParameterList,
    user: UserData,
) -> Result<MgPreconditioner, MgError> {
    let options = MgOptions::from_params(params)?;
    let mut h = Hierarchy::from_options(options);
    h.set_fine_operator(a)?;
    if let Some(ns) = user.nullspace {
        h.set_user_data(DataKey::Nullspace, LevelValue::VectorSet(ns))?;
    }
    if let Some(coords) = user.coordinates {
        h.set_user_data(DataKey::Coordinates, LevelValue::VectorSet(coords))?;
    }
    h.setup()?;
    MgPreconditioner::new(Arc::new(h))
}

/// Collective: rebuild `pc` for `a`, keeping what the configured reuse policy allows.
pub fn reuse_preconditioner(a: Arc<CrsMatrix>, pc: &mut MgPreconditioner) -> Result<(), MgError> {
    info!("reusing multigrid setup ({:?})", pc.hierarchy().options().reuse);
    pc.reuse(a)?;
    info!("reuse complete: {} levels", pc.hierarchy().num_levels());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParamValue;
    use crate::matrix::gallery;
    use crate::parallel::SerialComm;

    #[test]
    fn bad_parameter_is_reported() {
        let a = Arc::new(gallery::laplace_1d(10, Arc::new(SerialComm)).unwrap());
        let params = ParameterList::new().with("cycle type", ParamValue::Str("X".to_string()));
        let err = create_preconditioner(a, &params, UserData::default()).unwrap_err();
        assert!(matches!(err, MgError::InvalidParameter { .. }));
    }

    #[test]
    fn user_nullspace_is_used_on_the_fine_level() {
        let a = Arc::new(gallery::laplace_1d(90, Arc::new(SerialComm)).unwrap());
        let ns = Arc::new(MultiVector::from_global_fn(Arc::clone(a.row_map()), 1, |_, _| 2.0));
        let params = ParameterList::new().with("coarse: max size", 5_i64);
        let pc = create_preconditioner(
            a,
            &params,
            UserData { nullspace: Some(Arc::clone(&ns)), coordinates: None },
        )
        .unwrap();
        let fine = pc.hierarchy().level(0).unwrap();
        assert!(fine.get(DataKey::Nullspace).unwrap().ptr_eq(&LevelValue::VectorSet(ns)));
        assert!(pc.hierarchy().num_levels() >= 2);
    }
}
