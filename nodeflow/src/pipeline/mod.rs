//! Nodes and pipelines.
//!
//! This module provides:
//! - The [`Computation`] trait and closure constructors
//! - [`Node`] with arity and output validation
//! - [`Pipeline`] validation, layering, composition and filtering

pub mod computation;
mod graph;
mod node;

pub use computation::{func0, func1, func2, func3, func_n, variadic, Arity, Computation, FnComputation};
pub use graph::Pipeline;
pub use node::{node, Node, NodeOutputs};
