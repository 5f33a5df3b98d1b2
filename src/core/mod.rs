//! Core logic: types, expression resolution, application model, dependency graph.

pub mod config;
pub mod error;
pub mod graph;
pub mod model;
pub mod resolver;
pub mod types;
