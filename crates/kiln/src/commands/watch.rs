//! Watch command: build, then serve with live reload.

use std::sync::Arc;

use anyhow::{Context, Result};

use kiln_server::{DevServer, ReloadHub, WatchDispatcher};
use kiln_static::{CleanStage, BUILD_TASK};

use crate::commands::build::executor;
use crate::config::Project;

/// Run the watch command.
pub async fn run(project: &Project, port: Option<u16>, open: bool) -> Result<()> {
    let pipeline = project.pipeline()?;
    let hub = ReloadHub::new();
    let executor = executor(project, &pipeline)?.with_sink(Arc::new(hub.clone()));

    let rules = project.watch_rules(&pipeline)?;
    for rule in &rules {
        if rule.stage == CleanStage::NAME || rule.stage == CleanStage::VENDOR {
            anyhow::bail!("Watch rules cannot run '{}'", rule.stage);
        }
        executor
            .graph()
            .stage_named(&rule.stage)
            .with_context(|| format!("Watch rule targets '{}'", rule.stage))?;
    }

    // Keep serving after a failed build; the next change retries.
    if let Err(e) = executor.run(BUILD_TASK).await {
        tracing::error!("Initial build failed: {}", e);
    }

    let mut config = project.server(&pipeline.dest_dir);
    if let Some(port) = port {
        config.port = port;
    }
    config.open = config.open && open;

    let dispatcher = WatchDispatcher::new(executor, rules);
    tracing::info!("Watching {} for changes", project.root.display());

    DevServer::new(config, hub)
        .with_dispatcher(dispatcher)
        .start()
        .await?;

    Ok(())
}
