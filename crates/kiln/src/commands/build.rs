//! Build, clean and single-task commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use kiln_graph::{Executor, RunReport};
use kiln_static::{CleanStage, Pipeline, PipelineConfig, BUILD_TASK};

use crate::config::Project;

/// Task graph and executor for a project.
pub(crate) fn executor(project: &Project, pipeline: &PipelineConfig) -> Result<Executor> {
    let graph = Pipeline::from_config(pipeline).context("Invalid build configuration")?;
    let ctx = project.context(&pipeline.dest_dir);
    Ok(Executor::new(Arc::new(graph), ctx))
}

/// Run the build command.
pub async fn build(project: &Project, dest: Option<PathBuf>) -> Result<()> {
    let mut pipeline = project.pipeline()?;
    if let Some(dest) = dest {
        pipeline.dest_dir = dest;
    }

    tracing::info!("Building into {}...", pipeline.dest_dir.display());
    run_named(project, &pipeline, BUILD_TASK).await
}

/// Run the clean command.
pub async fn clean(project: &Project) -> Result<()> {
    let pipeline = project.pipeline()?;
    run_named(project, &pipeline, CleanStage::NAME).await
}

/// Run any named task.
pub async fn run(project: &Project, task: &str) -> Result<()> {
    let pipeline = project.pipeline()?;
    run_named(project, &pipeline, task).await
}

async fn run_named(project: &Project, pipeline: &PipelineConfig, task: &str) -> Result<()> {
    let report = executor(project, pipeline)?
        .run(task)
        .await
        .with_context(|| format!("Task '{}' failed", task))?;

    summarize(&report);
    Ok(())
}

fn summarize(report: &RunReport) {
    for stage in &report.stages {
        tracing::debug!(
            "{}: {} files in {}ms",
            stage.name,
            stage.outputs.len(),
            stage.duration.as_millis()
        );
    }
    tracing::info!(
        "Ran {} stages, {} files in {}ms",
        report.stages.len(),
        report.files_written(),
        report.duration.as_millis()
    );
}
