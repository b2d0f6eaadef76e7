//! Completion events pushed to a live-reload channel.

use std::path::PathBuf;

/// A stage finished and wrote these outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadEvent {
    /// Stage name
    pub stage: String,

    /// Outputs relative to the output directory
    pub outputs: Vec<PathBuf>,
}

/// Receiver of stage completion events.
pub trait ReloadSink: Send + Sync {
    /// Called after every successful stage run.
    fn notify(&self, event: ReloadEvent);
}
