//! Fluent construction of workflow graphs
//!
//! The builder registers executors, wires routes (direct edges, switches,
//! fan-out groups, fan-in groups), and designates the entry and output
//! executors. `build()` validates the composed graph and fails with a
//! descriptive error listing every violation; an inconsistent graph is
//! never handed to the runner.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{FlowEngineError, Result};
use crate::executor::Executor;
use crate::graph::{FanInGroup, Route, SwitchArm, WorkflowGraph};
use crate::message::ExecutorId;
use crate::validation::{validate, ValidationError};

/// Fluent builder for workflow graphs
///
/// # Example
///
/// ```ignore
/// let graph = GraphBuilder::new("claims", "Claims Intake")
///     .add_executor(intake)
///     .add_executor(validate)
///     .add_executor(archive)
///     .connect("intake", "validate")
///     .branch("validate", vec![
///         SwitchArm::new("retry", "intake", |m| m.is("claim.revision")),
///         SwitchArm::new("proceed", "archive", |m| m.is("claim.accepted")),
///     ])
///     .entry("intake")
///     .output("archive")
///     .build()?;
/// ```
pub struct GraphBuilder {
    id: String,
    name: String,
    executors: Vec<Arc<dyn Executor>>,
    routes: Vec<(ExecutorId, Route)>,
    fan_ins: Vec<FanInGroup>,
    entry: Option<ExecutorId>,
    output: Option<ExecutorId>,
}

impl GraphBuilder {
    /// Create a new graph builder
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            executors: Vec::new(),
            routes: Vec::new(),
            fan_ins: Vec::new(),
            entry: None,
            output: None,
        }
    }

    /// Register an executor
    pub fn add_executor(self, executor: impl Executor + 'static) -> Self {
        self.add_shared(Arc::new(executor))
    }

    /// Register an already-shared executor instance
    ///
    /// Use this to keep a handle on the instance (e.g. an aggregator you
    /// want to inspect) while the graph holds it too.
    pub fn add_shared(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executors.push(executor);
        self
    }

    /// Add an unconditional edge between two executors
    pub fn connect(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.routes.push((
            source.into(),
            Route::Direct {
                target: target.into(),
            },
        ));
        self
    }

    /// Add a switch: ordered predicate-guarded arms, first match wins
    pub fn branch(mut self, source: impl Into<String>, arms: Vec<SwitchArm>) -> Self {
        self.routes.push((source.into(), Route::Switch { arms }));
        self
    }

    /// Fan one executor's output out to several targets, run concurrently
    pub fn fan_out<I, S>(mut self, source: impl Into<String>, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.routes.push((
            source.into(),
            Route::FanOut {
                targets: targets.into_iter().map(Into::into).collect(),
            },
        ));
        self
    }

    /// Fan several sources back in through an aggregator
    ///
    /// Wires a direct edge from each source to the aggregator and records
    /// the group so build-time validation can check that every type the
    /// aggregator expects is producible by some source.
    pub fn fan_in<I, S>(mut self, sources: I, aggregator: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let aggregator = aggregator.into();
        let sources: Vec<ExecutorId> = sources.into_iter().map(Into::into).collect();
        for source in &sources {
            self.routes.push((
                source.clone(),
                Route::Direct {
                    target: aggregator.clone(),
                },
            ));
        }
        self.fan_ins.push(FanInGroup {
            sources,
            aggregator,
        });
        self
    }

    /// Designate the executor that receives the initial message
    pub fn entry(mut self, name: impl Into<String>) -> Self {
        self.entry = Some(name.into());
        self
    }

    /// Designate the sink executor whose emissions are the final output
    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.output = Some(name.into());
        self
    }

    /// Assemble without validation
    ///
    /// Useful when validation is run separately via [`validate`]. Duplicate
    /// registrations resolve first-wins.
    pub fn build_unchecked(self) -> WorkflowGraph {
        self.assemble().0
    }

    /// Validate and build the graph
    ///
    /// Fails with a `Configuration` error listing every violation found.
    pub fn build(self) -> Result<WorkflowGraph> {
        let (graph, mut errors) = self.assemble();
        errors.extend(validate(&graph));

        if errors.is_empty() {
            log::debug!(
                "built graph '{}' with {} executors",
                graph.id(),
                graph.executor_ids().len()
            );
            Ok(graph)
        } else {
            let joined = errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n");
            Err(FlowEngineError::Configuration(joined))
        }
    }

    fn assemble(self) -> (WorkflowGraph, Vec<ValidationError>) {
        let mut errors = Vec::new();

        let mut executors: HashMap<ExecutorId, Arc<dyn Executor>> = HashMap::new();
        for executor in self.executors {
            let name = executor.name().to_string();
            if executors.contains_key(&name) {
                errors.push(ValidationError::DuplicateExecutor { name });
            } else {
                executors.insert(name, executor);
            }
        }

        let mut routes: HashMap<ExecutorId, Route> = HashMap::new();
        for (source, route) in self.routes {
            if routes.contains_key(&source) {
                errors.push(ValidationError::DuplicateRoute {
                    source: source.clone(),
                });
            } else {
                routes.insert(source, route);
            }
        }

        let graph = WorkflowGraph::assemble(
            self.id,
            self.name,
            executors,
            routes,
            self.fan_ins,
            self.entry.unwrap_or_default(),
            self.output.unwrap_or_default(),
        );
        (graph, errors)
    }
}
