//! Mapping source changes to the stages that must re-run.
//!
//! Each stage has its own coalescing queue: a change that arrives while the
//! stage is running marks it dirty, and the stage runs exactly once more
//! when the current run ends. Different stages run concurrently.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kiln_graph::output::remove_output;
use kiln_graph::{Executor, GlobError, GlobSet};

use crate::watcher::WatchBatch;

/// Re-run `stage` when a path matching `globs` changes.
#[derive(Debug, Clone)]
pub struct WatchRule {
    pub globs: GlobSet,
    pub stage: String,
}

impl WatchRule {
    /// Compile a rule from patterns.
    pub fn new<I, S>(patterns: I, stage: impl Into<String>) -> Result<Self, GlobError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            globs: GlobSet::new(patterns)?,
            stage: stage.into(),
        })
    }
}

/// Stages whose rules match at least one path, in rule order.
pub fn affected_stages<'a, P>(rules: &'a [WatchRule], paths: P) -> Vec<&'a str>
where
    P: IntoIterator,
    P::Item: AsRef<Path>,
{
    let paths: Vec<P::Item> = paths.into_iter().collect();
    let mut stages: Vec<&str> = Vec::new();

    for rule in rules {
        if stages.contains(&rule.stage.as_str()) {
            continue;
        }
        if paths.iter().any(|p| rule.globs.is_match(p.as_ref())) {
            stages.push(&rule.stage);
        }
    }

    stages
}

#[derive(Default)]
struct QueueState {
    /// Running stages; `true` when another run was requested meanwhile
    running: HashMap<String, bool>,
}

/// Runs the stages affected by watch batches.
#[derive(Clone)]
pub struct WatchDispatcher {
    executor: Executor,
    rules: Arc<Vec<WatchRule>>,
    state: Arc<Mutex<QueueState>>,
}

impl WatchDispatcher {
    /// Create a dispatcher.
    pub fn new(executor: Executor, rules: Vec<WatchRule>) -> Self {
        Self {
            executor,
            rules: Arc::new(rules),
            state: Arc::new(Mutex::new(QueueState::default())),
        }
    }

    /// Project root the rules are relative to.
    pub fn root(&self) -> &Path {
        &self.executor.context().root
    }

    /// Watch rules in order.
    pub fn rules(&self) -> &[WatchRule] {
        &self.rules
    }

    /// Root-level directories the rules look at.
    pub fn watch_roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = Vec::new();
        for rule in self.rules.iter() {
            for glob in rule.globs.includes() {
                let base = glob.base().to_path_buf();
                if !roots.iter().any(|r| base.starts_with(r)) {
                    roots.retain(|r| !r.starts_with(&base));
                    roots.push(base);
                }
            }
        }
        roots
    }

    /// Handle one batch: drop outputs of removed sources, then re-run
    /// every affected stage.
    pub fn handle(&self, batch: &WatchBatch) -> Vec<String> {
        for removed in &batch.removed {
            self.remove_stale_outputs(removed);
        }

        let stages: Vec<String> = affected_stages(&self.rules, batch.paths())
            .into_iter()
            .map(str::to_string)
            .collect();

        for stage in &stages {
            self.trigger(stage);
        }

        stages
    }

    fn remove_stale_outputs(&self, source: &Path) {
        let graph = self.executor.graph();
        let ctx = self.executor.context();

        for rule in self.rules.iter().filter(|r| r.globs.is_match(source)) {
            let Ok(stage) = graph.stage_named(&rule.stage) else {
                continue;
            };
            let Some(output) = stage.output_for(ctx, source) else {
                continue;
            };
            match remove_output(&output) {
                Ok(true) => tracing::info!("Removed {}", output.display()),
                Ok(false) => {}
                Err(e) => tracing::warn!("Failed to remove stale output: {}", e),
            }
        }
    }

    /// Request a run of `stage`, coalescing with a run in flight.
    pub fn trigger(&self, stage: &str) {
        {
            let mut state = self.lock();
            if let Some(dirty) = state.running.get_mut(stage) {
                *dirty = true;
                tracing::debug!("'{}' is running, queued another run", stage);
                return;
            }
            state.running.insert(stage.to_string(), false);
        }

        let this = self.clone();
        let stage = stage.to_string();
        tokio::spawn(async move {
            loop {
                if let Err(e) = this.executor.run_stage(&stage).await {
                    tracing::error!("{}", e);
                }

                let mut state = this.lock();
                match state.running.get_mut(&stage) {
                    Some(dirty) if *dirty => *dirty = false,
                    _ => {
                        state.running.remove(&stage);
                        break;
                    }
                }
            }
        });
    }

    /// Whether any stage is running.
    pub fn is_busy(&self) -> bool {
        !self.lock().running.is_empty()
    }

    /// Wait until no stage is running.
    pub async fn wait_idle(&self) {
        while self.is_busy() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
