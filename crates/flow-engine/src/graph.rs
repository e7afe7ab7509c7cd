//! Workflow graph structure: executors, routes, entry and sink
//!
//! A graph is an ordered set of executors plus at most one outgoing route
//! per executor. Routes come in three shapes: a direct edge, a switch
//! (ordered predicate-guarded arms, first match wins), and a fan-out
//! group whose targets run concurrently. A plain edge is just a switch
//! with a single always-true predicate, modeled as its own variant.
//!
//! Cycles are ordinary back-edges (a switch arm pointing upstream); they
//! are not special-cased structurally and are bounded at run time by the
//! per-run iteration counters and the dispatch budget.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::executor::Executor;
use crate::message::{ExecutorId, Message};

/// Predicate evaluated against an emitted message to select a switch arm
pub type RoutePredicate = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// One guarded branch of a switch
#[derive(Clone)]
pub struct SwitchArm {
    /// Human-readable label, used in logs and routing errors
    pub label: String,
    /// Target executor when the predicate matches
    pub target: ExecutorId,
    predicate: RoutePredicate,
}

impl SwitchArm {
    /// Create an arm guarded by a predicate
    pub fn new(
        label: impl Into<String>,
        target: impl Into<String>,
        predicate: impl Fn(&Message) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            target: target.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Create an arm that matches every message
    ///
    /// As the last arm of a switch this acts as a fallback.
    pub fn always(label: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(label, target, |_| true)
    }

    /// Evaluate the predicate
    pub fn matches(&self, message: &Message) -> bool {
        (self.predicate)(message)
    }
}

impl fmt::Debug for SwitchArm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwitchArm")
            .field("label", &self.label)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// The single outgoing route of an executor
#[derive(Clone)]
pub enum Route {
    /// Unconditional edge to one target
    Direct { target: ExecutorId },
    /// Ordered conditional arms; the first matching predicate wins
    Switch { arms: Vec<SwitchArm> },
    /// An identical copy of the message goes to every target concurrently
    FanOut { targets: Vec<ExecutorId> },
}

impl Route {
    /// Every executor this route can deliver to
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Route::Direct { target } => vec![target.as_str()],
            Route::Switch { arms } => arms.iter().map(|a| a.target.as_str()).collect(),
            Route::FanOut { targets } => targets.iter().map(|t| t.as_str()).collect(),
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Direct { target } => f.debug_struct("Direct").field("target", target).finish(),
            Route::Switch { arms } => f.debug_struct("Switch").field("arms", arms).finish(),
            Route::FanOut { targets } => {
                f.debug_struct("FanOut").field("targets", targets).finish()
            }
        }
    }
}

/// Record of one fan-in group: which sources feed which aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanInGroup {
    pub sources: Vec<ExecutorId>,
    pub aggregator: ExecutorId,
}

/// A composed workflow: executors, routes, designated entry and sink
pub struct WorkflowGraph {
    id: String,
    name: String,
    executors: HashMap<ExecutorId, Arc<dyn Executor>>,
    routes: HashMap<ExecutorId, Route>,
    fan_ins: Vec<FanInGroup>,
    entry: ExecutorId,
    output: ExecutorId,
}

impl WorkflowGraph {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn assemble(
        id: String,
        name: String,
        executors: HashMap<ExecutorId, Arc<dyn Executor>>,
        routes: HashMap<ExecutorId, Route>,
        fan_ins: Vec<FanInGroup>,
        entry: ExecutorId,
        output: ExecutorId,
    ) -> Self {
        Self {
            id,
            name,
            executors,
            routes,
            fan_ins,
            entry,
            output,
        }
    }

    /// Unique identifier of this graph
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up an executor by name
    pub fn executor(&self, id: &str) -> Option<&Arc<dyn Executor>> {
        self.executors.get(id)
    }

    /// The outgoing route of an executor, if any
    pub fn route(&self, id: &str) -> Option<&Route> {
        self.routes.get(id)
    }

    /// The entry executor receiving the initial message
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// The designated sink executor whose emissions are the final output
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Names of all registered executors
    pub fn executor_ids(&self) -> Vec<&str> {
        self.executors.keys().map(|k| k.as_str()).collect()
    }

    /// Names of all executors that have an outgoing route
    pub fn route_sources(&self) -> Vec<&str> {
        self.routes.keys().map(|k| k.as_str()).collect()
    }

    /// Recorded fan-in groups
    pub fn fan_ins(&self) -> &[FanInGroup] {
        &self.fan_ins
    }

    /// Reset private state on every executor
    ///
    /// Instances holding per-run state (aggregators, accumulation buffers)
    /// must be reset before the graph is reused; the runner does this
    /// after a cancelled or failed run.
    pub async fn reset_all(&self) {
        for executor in self.executors.values() {
            executor.reset().await;
        }
    }
}

impl fmt::Debug for WorkflowGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowGraph")
            .field("id", &self.id)
            .field("executors", &self.executors.len())
            .field("routes", &self.routes.len())
            .field("entry", &self.entry)
            .field("output", &self.output)
            .finish()
    }
}
