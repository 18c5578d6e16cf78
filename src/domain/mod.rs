//! # Domain Layer
//!
//! Core models, the dependency graph, and the error taxonomy. Independent
//! of runtime, transport and storage concerns.

pub mod error;
pub mod graph;
pub mod models;

pub use error::*;
pub use graph::*;
pub use models::*;
