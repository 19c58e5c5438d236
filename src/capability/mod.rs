//! Capability objects and the registry that owns their single instances.

pub mod registry;
pub mod types;
