//! Task listing command.

use anyhow::Result;

use kiln_graph::{TaskGraph, TaskKind};
use kiln_static::Pipeline;

use crate::config::Project;

/// Run the tasks command.
pub async fn run(project: &Project, verbose: bool) -> Result<()> {
    let graph = Pipeline::from_config(&project.pipeline()?)?;
    print!("{}", listing(&graph, verbose)?);
    Ok(())
}

/// One line per task; composite tasks show their resolved plan when
/// `verbose` is set.
fn listing(graph: &TaskGraph, verbose: bool) -> Result<String> {
    let width = graph.tasks().map(|(name, _, _)| name.len()).max().unwrap_or(0);
    let mut out = String::new();

    for (name, description, kind) in graph.tasks() {
        let marker = match kind {
            TaskKind::Stage => ' ',
            TaskKind::Alias => '*',
        };
        out.push_str(&format!("{marker} {name:<width$}  {description}\n"));

        if verbose && kind == TaskKind::Alias {
            for line in graph.resolve(name)?.render().lines() {
                out.push_str(&format!("      {line}\n"));
            }
        }
    }

    Ok(out)
}
