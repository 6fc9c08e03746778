//! kiln - an incremental, parallel build engine for C/C++ projects
//!
//! This crate provides the core library functionality for kiln, including
//! profile resolution, task graph construction, incremental planning and
//! parallel execution.

pub mod builder;
pub mod core;
pub mod ops;
pub mod util;

/// Test utilities and mocks for kiln unit tests.
///
/// This module is only available when compiling with `--cfg test` or
/// running tests. It provides an in-memory tool invoker and project
/// fixtures.
#[cfg(test)]
pub mod test_support;

pub use core::{manifest::Manifest, profile::ProfileSet, task::Task};
pub use util::context::GlobalContext;
