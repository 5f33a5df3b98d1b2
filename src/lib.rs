//! ldk: run a synthesized cloud assembly locally.
//!
//! Reads the construct tree, stack templates and asset manifests of an
//! assembly, resolves intrinsic expressions against local identifiers,
//! builds a dependency graph of the application's resources and starts
//! local service providers in dependency order.

pub mod assembly;
pub mod cli;
pub mod core;
pub mod orchestrator;
pub mod pipeline;

#[cfg(test)]
mod test_utils;
