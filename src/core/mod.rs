//! Operator interface and distributed vector types.

pub mod traits;
pub mod vector;

pub use traits::{Operator, TransMode};
pub use vector::{DistVector, MultiVector};
