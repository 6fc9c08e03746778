//! High-level operations.
//!
//! This module contains the implementation of Kiln commands.

pub mod kiln_build;
pub mod kiln_clean;
pub mod kiln_profiles;

pub use kiln_build::{build, plan, prepare, BuildEnv, BuildError, BuildOptions, BuildResult};
pub use kiln_clean::{clean, CleanResult};
pub use kiln_profiles::{format_report, profiles, ProfileReport, ProfileSummary};
