//! Matrix module: distributed sparse matrices, sparse kernels, dense gathers and model problems.

pub mod dense;
pub mod gallery;
pub mod ops;
pub mod sparse;

pub use dense::{gather_dense, gather_vector};
pub use ops::{add, multiply, transpose, triple_product};
pub use sparse::{CrsMatrix, RowView};
