//! Project context.
//!
//! A [`ProjectContext`] ties a project directory to its configuration, its
//! data catalog and its registered pipelines. It is created once per
//! invocation and passed explicitly; there is no process-wide state.

#[cfg(test)]
mod context_tests;
mod project;

pub use project::{ProjectContext, RunOptions, DEFAULT_ENV, DEFAULT_PIPELINE};
