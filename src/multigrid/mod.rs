//! Algebraic multigrid: levels, factories, the dependency manager, the hierarchy and the
//! cycle that applies it.
//!
//! Setup is demand driven. [`Hierarchy::setup`] asks for the prolongator, restrictor and
//! coarse operator of each level; the [`FactoryManager`] plans which factories must run to
//! produce them and the hierarchy executes that plan. Once the hierarchy is ready it is
//! read-only and [`MgPreconditioner`] applies V- or W-cycles with it.

pub mod factory;
pub mod hierarchy;
pub mod level;
pub mod manager;
pub mod operator;

pub use factory::{BuildContext, Factory, FactoryId, Input, Output, Rel};
pub use hierarchy::{BuildReport, Hierarchy, HierarchyState};
pub use level::{DataKey, Entry, Level, LevelValue, Producer, ReuseClass};
pub use manager::{FactoryManager, Step};
pub use operator::MgPreconditioner;
