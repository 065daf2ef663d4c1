//! Processor workflows: small graphs of named steps.
//!
//! A [`Workflow`] is built by a processor for one data file. Steps declare
//! the steps they depend on; execution runs them in a topological order,
//! threading the processor's owned [`Report`] through each one and making
//! every earlier step's output available to later ones.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use doorstep_report::{Report, ReportError};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde_json::Value;
use tracing::debug;

use crate::definition::ProcessorMetadata;
use crate::error::{EngineError, Result};

/// Failure raised inside a workflow step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepError {
    /// Type of the underlying failure, e.g. `io` or `parse`.
    pub kind: String,
    pub message: String,
}

impl StepError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for StepError {}

impl From<std::io::Error> for StepError {
    fn from(err: std::io::Error) -> Self {
        StepError::new("io", err.to_string())
    }
}

impl From<ReportError> for StepError {
    fn from(err: ReportError) -> Self {
        StepError::new("report", err.to_string())
    }
}

impl From<serde_json::Error> for StepError {
    fn from(err: serde_json::Error) -> Self {
        StepError::new("parse", err.to_string())
    }
}

/// What a running step can see and change.
pub struct StepContext<'a> {
    pub report: &'a mut Report,
    pub file: &'a Path,
    pub metadata: &'a ProcessorMetadata,
    outputs: &'a HashMap<String, Value>,
}

impl StepContext<'_> {
    /// Output of an earlier step.
    pub fn output(&self, step: &str) -> Option<&Value> {
        self.outputs.get(step)
    }
}

/// Body of a step. Its return value is recorded as the step's output.
pub type StepFn =
    Arc<dyn Fn(&mut StepContext<'_>) -> std::result::Result<Value, StepError> + Send + Sync>;

/// One named unit of work.
#[derive(Clone)]
pub struct Step {
    id: String,
    dependencies: Vec<String>,
    run: StepFn,
}

impl Step {
    pub fn new<F>(id: impl Into<String>, run: F) -> Self
    where
        F: Fn(&mut StepContext<'_>) -> std::result::Result<Value, StepError> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            dependencies: Vec::new(),
            run: Arc::new(run),
        }
    }

    /// Run only after `step` has finished.
    pub fn after(mut self, step: impl Into<String>) -> Self {
        self.dependencies.push(step.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

/// A processor's task graph.
#[derive(Debug, Clone, Default)]
pub struct Workflow {
    steps: Vec<Step>,
}

impl Workflow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps in an order that respects every dependency.
    ///
    /// Duplicate ids, unknown dependencies and cycles are configuration
    /// errors.
    pub fn execution_order(&self) -> Result<Vec<&Step>> {
        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let mut index: HashMap<&str, NodeIndex> = HashMap::new();

        for (i, step) in self.steps.iter().enumerate() {
            if index.insert(step.id.as_str(), graph.add_node(i)).is_some() {
                return Err(EngineError::Configuration(format!(
                    "duplicate workflow step '{}'",
                    step.id
                )));
            }
        }

        for step in &self.steps {
            let to = index[step.id.as_str()];
            for dep in &step.dependencies {
                let from = index.get(dep.as_str()).ok_or_else(|| {
                    EngineError::Configuration(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.id, dep
                    ))
                })?;
                graph.add_edge(*from, to, ());
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            let step = &self.steps[graph[cycle.node_id()]];
            EngineError::Configuration(format!("workflow cycle through step '{}'", step.id))
        })?;

        Ok(order.into_iter().map(|n| &self.steps[graph[n]]).collect())
    }

    /// Run every step against `file`, returning the finished report.
    ///
    /// The elapsed time is recorded as the report's `time` property. A step
    /// failure is attributed to `processor`.
    pub fn run(
        &self,
        processor: &str,
        mut report: Report,
        file: &Path,
        metadata: &ProcessorMetadata,
    ) -> Result<Report> {
        let started = Instant::now();
        let mut outputs = HashMap::new();

        for step in self.execution_order()? {
            debug!(processor, step = %step.id, "Running workflow step");
            let mut context = StepContext {
                report: &mut report,
                file,
                metadata,
                outputs: &outputs,
            };
            let output = (step.run)(&mut context).map_err(|e| EngineError::Processor {
                processor: processor.to_string(),
                underlying: e.kind,
                message: e.message,
            })?;
            outputs.insert(step.id.clone(), output);
        }

        report.set_property("time", Value::from(started.elapsed().as_secs_f64()));
        Ok(report)
    }
}
