pub mod canonical_index;
pub mod catalog;
pub mod config;
pub mod normalize;
pub mod overrides;
pub mod patch;
pub mod planner;
pub mod reconcile;
pub mod resolver;
pub mod runtime;
pub mod template;
