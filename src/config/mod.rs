//! Configuration: parameter lists and the typed multigrid options read from them.

pub mod options;
pub mod params;

pub use options::{
    AggregationType, Algorithm, CoarseType, CycleType, MgOptions, ReuseType, SmootherPlacement, SmootherType,
};
pub use params::{ParamType, ParamValue, ParameterList};
