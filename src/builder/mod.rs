//! The build engine.
//!
//! Files are collected, turned into tasks by generators, wired into a
//! [`BuildGraph`], compared with the persisted [`BuildState`] by the
//! [`IncrementalPlanner`], executed by the [`Scheduler`], and finally
//! linked by the [`ArtifactLinker`].

pub mod collector;
pub mod events;
pub mod generator;
pub mod graph;
pub mod includes;
pub mod invoker;
pub mod linker;
pub mod planner;
pub mod progress;
pub mod scheduler;
pub mod state;
pub mod toolchain;

pub use collector::FileCollector;
pub use events::BuildEvent;
pub use generator::{CompileGenerator, GeneratorRegistry, InterfaceGenerator, TaskGenerator};
pub use graph::{BuildGraph, GraphError};
pub use invoker::{ProcessInvoker, ToolInvoker, ToolOutput};
pub use linker::{ArtifactLinker, LinkError, LinkOutcome};
pub use planner::{DirtyReason, IncrementalPlanner, Plan};
pub use progress::{BuildObserver, JsonObserver, NullObserver, ProgressObserver};
pub use scheduler::{ScheduleReport, Scheduler, TaskFailure};
pub use state::{BuildState, BuildStateStore, StateGuard, TaskRecord};
pub use toolchain::{CommandSpec, GnuToolchain, Toolchain};
