//! Build task graph for kiln.
//!
//! Stages map a set of source files to a set of output files. Named tasks
//! compose stages in series and in parallel; the executor runs a resolved
//! plan and pushes completion events to a live-reload sink.

pub mod executor;
pub mod glob;
pub mod graph;
pub mod output;
pub mod reload;
pub mod stage;

pub use executor::{Executor, RunError, RunReport, StageReport};
pub use glob::{Glob, GlobError, GlobSet, Matched};
pub use graph::{parallel, series, task, GraphError, Plan, Step, TaskDef, TaskGraph, TaskKind};
pub use reload::{ReloadEvent, ReloadSink};
pub use stage::{BuildContext, Stage, StageError, StageOutput};
