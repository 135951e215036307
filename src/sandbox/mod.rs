//! Sandbox module containing all execution-related components.

pub mod config;
pub mod deadline;
pub mod executor;
pub mod io;
pub mod limits;
pub mod namespace;
pub mod normalize;
pub mod outcome;
