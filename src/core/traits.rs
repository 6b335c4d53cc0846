//! Core linear-algebra traits for mulgrid.

use std::sync::Arc;

use crate::core::vector::DistVector;
use crate::error::MgError;
use crate::parallel::Map;

/// Which form of the operator `apply` uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransMode {
    #[default]
    NoTrans,
    Trans,
    ConjTrans,
}

/// A distributed linear operator: y ← β·y + α·Op(A)·x.
///
/// `x` lives on the domain map (range map for transposed modes) and `y` on the range map.
pub trait Operator: Send + Sync {
    fn apply(
        &self,
        x: &DistVector,
        y: &mut DistVector,
        mode: TransMode,
        alpha: f64,
        beta: f64,
    ) -> Result<(), MgError>;

    fn domain_map(&self) -> Result<&Arc<Map>, MgError>;
    fn range_map(&self) -> Result<&Arc<Map>, MgError>;

    /// Human-readable label used in logs.
    fn label(&self) -> String;

    /// Convenience: y = Op(A)·x.
    fn matvec(&self, x: &DistVector, y: &mut DistVector) -> Result<(), MgError> {
        self.apply(x, y, TransMode::NoTrans, 1.0, 0.0)
    }
}

impl<T: Operator + ?Sized> Operator for Arc<T> {
    fn apply(
        &self,
        x: &DistVector,
        y: &mut DistVector,
        mode: TransMode,
        alpha: f64,
        beta: f64,
    ) -> Result<(), MgError> {
        (**self).apply(x, y, mode, alpha, beta)
    }

    fn domain_map(&self) -> Result<&Arc<Map>, MgError> {
        (**self).domain_map()
    }

    fn range_map(&self) -> Result<&Arc<Map>, MgError> {
        (**self).range_map()
    }

    fn label(&self) -> String {
        (**self).label()
    }
}
