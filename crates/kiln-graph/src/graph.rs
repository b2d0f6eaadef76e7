//! Named tasks and their resolution into execution plans.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::stage::Stage;

/// A reference to work inside a composite task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Run a named task
    Task(String),

    /// Run steps one after another
    Series(Vec<Step>),

    /// Run steps at the same time
    Parallel(Vec<Step>),
}

/// Reference a named task.
pub fn task(name: impl Into<String>) -> Step {
    Step::Task(name.into())
}

/// Run steps in order.
pub fn series(steps: impl IntoIterator<Item = Step>) -> Step {
    Step::Series(steps.into_iter().collect())
}

/// Run steps concurrently.
pub fn parallel(steps: impl IntoIterator<Item = Step>) -> Step {
    Step::Parallel(steps.into_iter().collect())
}

/// Definition of a named task.
#[derive(Clone)]
pub enum TaskDef {
    /// A stage that does work
    Stage(Arc<dyn Stage>),

    /// A composition of other tasks
    Alias(Step),
}

/// Kind of a task, for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Stage,
    Alias,
}

/// A resolved task tree containing only stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Stage(String),
    Series(Vec<Plan>),
    Parallel(Vec<Plan>),
}

/// Errors from building or resolving a task graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Task '{0}' is already defined")]
    DuplicateTask(String),

    #[error("Task '{name}' is not defined{}", .referenced_by.as_ref().map(|r| format!(" (referenced by '{r}')")).unwrap_or_default())]
    UnknownTask {
        name: String,
        referenced_by: Option<String>,
    },

    #[error("Task '{name}' is not a stage")]
    NotAStage { name: String },

    #[error("Task cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

struct TaskEntry {
    name: String,
    description: String,
    def: TaskDef,
}

/// A registry of named tasks.
#[derive(Default)]
pub struct TaskGraph {
    entries: Vec<TaskEntry>,
    index: HashMap<String, usize>,
}

impl TaskGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stage under its own name.
    pub fn stage(&mut self, stage: impl Stage + 'static) -> Result<&mut Self, GraphError> {
        let stage: Arc<dyn Stage> = Arc::new(stage);
        let name = stage.name().to_string();
        let description = stage.description().to_string();
        self.insert(name, description, TaskDef::Stage(stage))
    }

    /// Register a composite task.
    pub fn alias(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        step: Step,
    ) -> Result<&mut Self, GraphError> {
        self.insert(name.into(), description.into(), TaskDef::Alias(step))
    }

    fn insert(
        &mut self,
        name: String,
        description: String,
        def: TaskDef,
    ) -> Result<&mut Self, GraphError> {
        if self.index.contains_key(&name) {
            return Err(GraphError::DuplicateTask(name));
        }
        self.index.insert(name.clone(), self.entries.len());
        self.entries.push(TaskEntry {
            name,
            description,
            def,
        });
        Ok(self)
    }

    /// Whether a task with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Look up a stage by name.
    pub fn stage_named(&self, name: &str) -> Result<Arc<dyn Stage>, GraphError> {
        match self.get(name) {
            Some(TaskDef::Stage(stage)) => Ok(Arc::clone(stage)),
            Some(TaskDef::Alias(_)) => Err(GraphError::NotAStage {
                name: name.to_string(),
            }),
            None => Err(GraphError::UnknownTask {
                name: name.to_string(),
                referenced_by: None,
            }),
        }
    }

    fn get(&self, name: &str) -> Option<&TaskDef> {
        self.index.get(name).map(|&i| &self.entries[i].def)
    }

    /// All stages in registration order.
    pub fn stages(&self) -> impl Iterator<Item = &Arc<dyn Stage>> {
        self.entries.iter().filter_map(|e| match &e.def {
            TaskDef::Stage(stage) => Some(stage),
            TaskDef::Alias(_) => None,
        })
    }

    /// Name, description and kind of every task in registration order.
    pub fn tasks(&self) -> impl Iterator<Item = (&str, &str, TaskKind)> {
        self.entries.iter().map(|e| {
            let kind = match e.def {
                TaskDef::Stage(_) => TaskKind::Stage,
                TaskDef::Alias(_) => TaskKind::Alias,
            };
            (e.name.as_str(), e.description.as_str(), kind)
        })
    }

    /// Resolve a task into a plan of stages.
    pub fn resolve(&self, name: &str) -> Result<Plan, GraphError> {
        let mut stack = Vec::new();
        self.resolve_named(name, None, &mut stack)
    }

    /// Resolve every task, reporting the first error.
    pub fn validate(&self) -> Result<(), GraphError> {
        for entry in &self.entries {
            self.resolve(&entry.name)?;
        }
        Ok(())
    }

    fn resolve_named(
        &self,
        name: &str,
        referenced_by: Option<&str>,
        stack: &mut Vec<String>,
    ) -> Result<Plan, GraphError> {
        if let Some(pos) = stack.iter().position(|n| n == name) {
            let mut cycle = stack[pos..].to_vec();
            cycle.push(name.to_string());
            return Err(GraphError::Cycle(cycle));
        }

        let def = self.get(name).ok_or_else(|| GraphError::UnknownTask {
            name: name.to_string(),
            referenced_by: referenced_by.map(str::to_string),
        })?;

        match def {
            TaskDef::Stage(_) => Ok(Plan::Stage(name.to_string())),
            TaskDef::Alias(step) => {
                stack.push(name.to_string());
                let plan = self.resolve_step(step, name, stack);
                stack.pop();
                plan
            }
        }
    }

    fn resolve_step(
        &self,
        step: &Step,
        owner: &str,
        stack: &mut Vec<String>,
    ) -> Result<Plan, GraphError> {
        match step {
            Step::Task(name) => self.resolve_named(name, Some(owner), stack),
            Step::Series(steps) => Ok(Plan::Series(
                steps
                    .iter()
                    .map(|s| self.resolve_step(s, owner, stack))
                    .collect::<Result<_, _>>()?,
            )),
            Step::Parallel(steps) => Ok(Plan::Parallel(
                steps
                    .iter()
                    .map(|s| self.resolve_step(s, owner, stack))
                    .collect::<Result<_, _>>()?,
            )),
        }
    }
}

impl Plan {
    /// Stage names in execution order.
    pub fn stages(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_stages(&mut out);
        out
    }

    fn collect_stages<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Plan::Stage(name) => out.push(name),
            Plan::Series(plans) | Plan::Parallel(plans) => {
                for plan in plans {
                    plan.collect_stages(out);
                }
            }
        }
    }

    /// Render the plan as an indented tree.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        match self {
            Plan::Stage(name) => {
                let _ = writeln!(out, "{indent}{name}");
            }
            Plan::Series(plans) => {
                let _ = writeln!(out, "{indent}series");
                for plan in plans {
                    plan.render_into(out, depth + 1);
                }
            }
            Plan::Parallel(plans) => {
                let _ = writeln!(out, "{indent}parallel");
                for plan in plans {
                    plan.render_into(out, depth + 1);
                }
            }
        }
    }
}
