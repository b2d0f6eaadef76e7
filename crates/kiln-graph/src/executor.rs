//! Plan execution.
//!
//! Stages run on the blocking thread pool. Series members run one after
//! another and stop at the first failure. Parallel members are all started
//! together and all run to completion; the group then fails with the first
//! error in declaration order.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{join_all, BoxFuture};

use crate::graph::{GraphError, Plan, TaskGraph};
use crate::reload::{ReloadEvent, ReloadSink};
use crate::stage::{BuildContext, StageError};

/// Outcome of one stage run.
#[derive(Debug, Clone)]
pub struct StageReport {
    /// Stage name
    pub name: String,

    /// Files the stage wrote
    pub outputs: Vec<PathBuf>,

    /// Wall time
    pub duration: Duration,
}

/// Outcome of a task run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Task that was run
    pub task: String,

    /// Stage reports in completion order
    pub stages: Vec<StageReport>,

    /// Total wall time
    pub duration: Duration,
}

impl RunReport {
    /// Number of files written across all stages.
    pub fn files_written(&self) -> usize {
        self.stages.iter().map(|s| s.outputs.len()).sum()
    }
}

/// Errors from running a task.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: String,
        source: StageError,
        /// Stages of the same run that finished before the failure
        completed: Vec<StageReport>,
        /// Stages of the same run that never started
        skipped: Vec<String>,
    },
}

impl RunError {
    /// Reports of stages that completed before the run failed.
    pub fn completed(&self) -> &[StageReport] {
        match self {
            RunError::Stage { completed, .. } => completed,
            RunError::Graph(_) => &[],
        }
    }

    /// Stages that were skipped because an earlier series member failed.
    pub fn skipped(&self) -> &[String] {
        match self {
            RunError::Stage { skipped, .. } => skipped,
            RunError::Graph(_) => &[],
        }
    }

    fn take_progress(&mut self) -> (Vec<StageReport>, Vec<String>) {
        match self {
            RunError::Stage {
                completed, skipped, ..
            } => (std::mem::take(completed), std::mem::take(skipped)),
            RunError::Graph(_) => (Vec::new(), Vec::new()),
        }
    }

    fn with_progress(mut self, done: Vec<StageReport>, not_run: Vec<String>) -> Self {
        if let RunError::Stage {
            completed, skipped, ..
        } = &mut self
        {
            let inner = std::mem::replace(completed, done);
            completed.extend(inner);
            skipped.extend(not_run);
        }
        self
    }
}

/// Runs tasks from a [`TaskGraph`].
#[derive(Clone)]
pub struct Executor {
    graph: Arc<TaskGraph>,
    ctx: Arc<BuildContext>,
    sink: Option<Arc<dyn ReloadSink>>,
}

impl Executor {
    /// Create an executor for a graph.
    pub fn new(graph: Arc<TaskGraph>, ctx: BuildContext) -> Self {
        Self {
            graph,
            ctx: Arc::new(ctx),
            sink: None,
        }
    }

    /// Push completion events to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn ReloadSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// The task graph.
    pub fn graph(&self) -> &Arc<TaskGraph> {
        &self.graph
    }

    /// The build context.
    pub fn context(&self) -> &BuildContext {
        &self.ctx
    }

    /// Resolve and run a named task.
    pub async fn run(&self, name: &str) -> Result<RunReport, RunError> {
        let plan = self.graph.resolve(name)?;
        let start = Instant::now();

        tracing::info!("Starting '{}'...", name);

        match self.execute(&plan).await {
            Ok(stages) => {
                let duration = start.elapsed();
                tracing::info!("Finished '{}' after {} ms", name, duration.as_millis());
                Ok(RunReport {
                    task: name.to_string(),
                    stages,
                    duration,
                })
            }
            Err(e) => {
                tracing::error!("'{}' errored after {} ms", name, start.elapsed().as_millis());
                Err(e)
            }
        }
    }

    fn execute<'a>(&'a self, plan: &'a Plan) -> BoxFuture<'a, Result<Vec<StageReport>, RunError>> {
        Box::pin(async move {
            match plan {
                Plan::Stage(name) => Ok(vec![self.run_stage(name).await?]),

                Plan::Series(plans) => {
                    let mut reports = Vec::new();
                    for (i, step) in plans.iter().enumerate() {
                        match self.execute(step).await {
                            Ok(done) => reports.extend(done),
                            Err(e) => {
                                let skipped: Vec<String> = plans[i + 1..]
                                    .iter()
                                    .flat_map(Plan::stages)
                                    .map(str::to_string)
                                    .collect();
                                if !skipped.is_empty() {
                                    tracing::warn!("Skipping {}", skipped.join(", "));
                                }
                                return Err(e.with_progress(reports, skipped));
                            }
                        }
                    }
                    Ok(reports)
                }

                Plan::Parallel(plans) => {
                    let results = join_all(plans.iter().map(|p| self.execute(p))).await;

                    let mut reports = Vec::new();
                    let mut skipped = Vec::new();
                    let mut first_error = None;
                    for result in results {
                        match result {
                            Ok(done) => reports.extend(done),
                            Err(mut e) => {
                                let (done, not_run) = e.take_progress();
                                reports.extend(done);
                                skipped.extend(not_run);
                                if first_error.is_none() {
                                    first_error = Some(e);
                                }
                            }
                        }
                    }

                    match first_error {
                        Some(e) => Err(e.with_progress(reports, skipped)),
                        None => Ok(reports),
                    }
                }
            }
        })
    }

    /// Run a single stage by name.
    pub async fn run_stage(&self, name: &str) -> Result<StageReport, RunError> {
        let stage = self.graph.stage_named(name)?;
        let ctx = Arc::clone(&self.ctx);
        let start = Instant::now();

        tracing::info!("Starting '{}'...", name);

        let result = tokio::task::spawn_blocking(move || stage.run(&ctx))
            .await
            .unwrap_or_else(|e| Err(StageError::Panicked(e.to_string())));

        let output = match result {
            Ok(output) => output,
            Err(source) => {
                tracing::error!("'{}' errored: {}", name, source);
                return Err(RunError::Stage {
                    stage: name.to_string(),
                    source,
                    completed: Vec::new(),
                    skipped: Vec::new(),
                });
            }
        };

        let duration = start.elapsed();
        tracing::info!(
            "Finished '{}' after {} ms ({} files)",
            name,
            duration.as_millis(),
            output.outputs.len()
        );

        if let Some(sink) = &self.sink {
            let dest = self.ctx.dest_dir();
            sink.notify(ReloadEvent {
                stage: name.to_string(),
                outputs: output
                    .outputs
                    .iter()
                    .map(|p| p.strip_prefix(&dest).unwrap_or(p).to_path_buf())
                    .collect(),
            });
        }

        Ok(StageReport {
            name: name.to_string(),
            outputs: output.outputs,
            duration,
        })
    }
}
