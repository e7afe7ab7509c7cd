//! Graph validation
//!
//! Validates the structure of a workflow graph before it runs: route
//! endpoints, type compatibility between connected executors, switch and
//! fan-out shape, fan-in coverage, and sink reachability. All errors are
//! collected and reported together (not just the first).
//!
//! Type compatibility is checked from each executor's declared contract:
//! a direct or fan-out target must accept every type its source can emit,
//! while a switch arm's target must accept at least one of them (arms are
//! routinely type-selective, e.g. a retry arm carries only the revision
//! type back upstream). Whether a concrete message finds a matching arm
//! remains data-dependent and is surfaced at run time as a routing error.
//!
//! Cycles are deliberately permitted; they are bounded at run time.

use std::collections::{HashSet, VecDeque};

use crate::graph::{Route, WorkflowGraph};

/// Validation error with location context
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Two executors were registered under the same name
    DuplicateExecutor { name: String },
    /// No entry executor was designated
    MissingEntry,
    /// No output executor was designated
    MissingOutput,
    /// The designated entry is not a registered executor
    UnknownEntry { name: String },
    /// The designated output is not a registered executor
    UnknownOutput { name: String },
    /// A route starts at an unregistered executor
    UnknownRouteSource { source: String },
    /// A route points at an unregistered executor
    UnknownRouteTarget { source: String, target: String },
    /// An executor was given more than one outgoing route
    DuplicateRoute { source: String },
    /// A switch with no arms
    EmptySwitch { source: String },
    /// A fan-out with no targets
    EmptyFanOut { source: String },
    /// The same executor appears twice in one fan-out without being
    /// marked safe to share
    UnsharedFanOutTarget { source: String, target: String },
    /// A target cannot handle a message type its source can emit
    TypeMismatch {
        source: String,
        target: String,
        message_type: String,
    },
    /// A switch arm target accepts none of the types its source can emit
    DeadArm {
        source: String,
        label: String,
        target: String,
    },
    /// A non-sink executor with no outgoing route
    DeadEnd { executor: String },
    /// The sink executor has an outgoing route
    SinkHasRoute { target: String },
    /// The output executor cannot be reached from the entry
    UnreachableOutput,
    /// An expected fan-in type is produced by none of the group's sources
    IncompleteFanIn {
        aggregator: String,
        message_type: String,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateExecutor { name } => {
                write!(f, "Executor '{}' is registered more than once", name)
            }
            Self::MissingEntry => write!(f, "No entry executor designated"),
            Self::MissingOutput => write!(f, "No output executor designated"),
            Self::UnknownEntry { name } => {
                write!(f, "Entry executor '{}' is not registered", name)
            }
            Self::UnknownOutput { name } => {
                write!(f, "Output executor '{}' is not registered", name)
            }
            Self::UnknownRouteSource { source } => {
                write!(f, "Route starts at unregistered executor '{}'", source)
            }
            Self::UnknownRouteTarget { source, target } => {
                write!(
                    f,
                    "Route from '{}' points at unregistered executor '{}'",
                    source, target
                )
            }
            Self::DuplicateRoute { source } => {
                write!(f, "Executor '{}' has more than one outgoing route", source)
            }
            Self::EmptySwitch { source } => {
                write!(f, "Switch at '{}' has no arms", source)
            }
            Self::EmptyFanOut { source } => {
                write!(f, "Fan-out at '{}' has no targets", source)
            }
            Self::UnsharedFanOutTarget { source, target } => {
                write!(
                    f,
                    "Fan-out at '{}' lists '{}' more than once but it is not marked shareable",
                    source, target
                )
            }
            Self::TypeMismatch {
                source,
                target,
                message_type,
            } => {
                write!(
                    f,
                    "'{}' can emit '{}' but target '{}' declares no handler for it",
                    source, message_type, target
                )
            }
            Self::DeadArm {
                source,
                label,
                target,
            } => {
                write!(
                    f,
                    "Switch arm '{}' at '{}' targets '{}' which accepts none of the emitted types",
                    label, source, target
                )
            }
            Self::DeadEnd { executor } => {
                write!(
                    f,
                    "Executor '{}' is not the output and has no outgoing route",
                    executor
                )
            }
            Self::SinkHasRoute { target } => {
                write!(
                    f,
                    "Output executor has an outgoing route (to '{}'); its emissions are final",
                    target
                )
            }
            Self::UnreachableOutput => {
                write!(f, "Output executor cannot be reached from the entry")
            }
            Self::IncompleteFanIn {
                aggregator,
                message_type,
            } => {
                write!(
                    f,
                    "Fan-in into '{}' expects '{}' but no source in the group emits it",
                    aggregator, message_type
                )
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate a workflow graph
///
/// Returns all validation errors found (not just the first).
pub fn validate(graph: &WorkflowGraph) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    validate_designations(graph, &mut errors);
    validate_route_references(graph, &mut errors);
    validate_route_shapes(graph, &mut errors);
    validate_type_compatibility(graph, &mut errors);
    validate_chain_ends(graph, &mut errors);
    validate_reachability(graph, &mut errors);
    validate_fan_in_coverage(graph, &mut errors);

    errors
}

fn validate_designations(graph: &WorkflowGraph, errors: &mut Vec<ValidationError>) {
    if graph.entry().is_empty() {
        errors.push(ValidationError::MissingEntry);
    } else if graph.executor(graph.entry()).is_none() {
        errors.push(ValidationError::UnknownEntry {
            name: graph.entry().to_string(),
        });
    }

    if graph.output().is_empty() {
        errors.push(ValidationError::MissingOutput);
    } else if graph.executor(graph.output()).is_none() {
        errors.push(ValidationError::UnknownOutput {
            name: graph.output().to_string(),
        });
    }
}

/// Check that every route endpoint is a registered executor
fn validate_route_references(graph: &WorkflowGraph, errors: &mut Vec<ValidationError>) {
    for source in graph.route_sources() {
        if graph.executor(source).is_none() {
            errors.push(ValidationError::UnknownRouteSource {
                source: source.to_string(),
            });
        }
        let Some(route) = graph.route(source) else {
            continue;
        };
        for target in route.targets() {
            if graph.executor(target).is_none() {
                errors.push(ValidationError::UnknownRouteTarget {
                    source: source.to_string(),
                    target: target.to_string(),
                });
            }
        }
    }
}

/// Check switch/fan-out shape
fn validate_route_shapes(graph: &WorkflowGraph, errors: &mut Vec<ValidationError>) {
    for source in graph.route_sources() {
        match graph.route(source) {
            Some(Route::Switch { arms }) if arms.is_empty() => {
                errors.push(ValidationError::EmptySwitch {
                    source: source.to_string(),
                });
            }
            Some(Route::FanOut { targets }) => {
                if targets.is_empty() {
                    errors.push(ValidationError::EmptyFanOut {
                        source: source.to_string(),
                    });
                }
                let mut seen = HashSet::new();
                for target in targets {
                    if !seen.insert(target.as_str()) {
                        let shareable = graph
                            .executor(target)
                            .map(|e| e.shareable())
                            .unwrap_or(false);
                        if !shareable {
                            errors.push(ValidationError::UnsharedFanOutTarget {
                                source: source.to_string(),
                                target: target.to_string(),
                            });
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

/// Check that connected executors agree on message types
fn validate_type_compatibility(graph: &WorkflowGraph, errors: &mut Vec<ValidationError>) {
    for source in graph.route_sources() {
        let (Some(executor), Some(route)) = (graph.executor(source), graph.route(source)) else {
            continue;
        };
        let emitted = executor.emitted_types();

        match route {
            Route::Direct { target } => {
                check_strict(graph, source, target, &emitted, errors);
            }
            Route::FanOut { targets } => {
                for target in targets {
                    check_strict(graph, source, target, &emitted, errors);
                }
            }
            Route::Switch { arms } => {
                for arm in arms {
                    let Some(target) = graph.executor(&arm.target) else {
                        continue;
                    };
                    if !emitted.is_empty() && !emitted.iter().any(|t| target.accepts(t)) {
                        errors.push(ValidationError::DeadArm {
                            source: source.to_string(),
                            label: arm.label.clone(),
                            target: arm.target.clone(),
                        });
                    }
                }
            }
        }
    }
}

fn check_strict(
    graph: &WorkflowGraph,
    source: &str,
    target_id: &str,
    emitted: &[String],
    errors: &mut Vec<ValidationError>,
) {
    let Some(target) = graph.executor(target_id) else {
        return;
    };
    for message_type in emitted {
        if !target.accepts(message_type) {
            errors.push(ValidationError::TypeMismatch {
                source: source.to_string(),
                target: target_id.to_string(),
                message_type: message_type.clone(),
            });
        }
    }
}

/// Every chain must end at the sink (or a barrier); a routeless non-sink
/// executor is a dead end, and the sink itself must not route onward
fn validate_chain_ends(graph: &WorkflowGraph, errors: &mut Vec<ValidationError>) {
    for id in graph.executor_ids() {
        let has_route = graph.route(id).is_some();
        if id == graph.output() {
            if let Some(route) = graph.route(id) {
                if let Some(target) = route.targets().first() {
                    errors.push(ValidationError::SinkHasRoute {
                        target: target.to_string(),
                    });
                }
            }
        } else if !has_route {
            errors.push(ValidationError::DeadEnd {
                executor: id.to_string(),
            });
        }
    }
}

/// Breadth-first reachability from the entry over route targets
fn validate_reachability(graph: &WorkflowGraph, errors: &mut Vec<ValidationError>) {
    if graph.executor(graph.entry()).is_none() || graph.executor(graph.output()).is_none() {
        // Designation errors already reported; reachability is meaningless
        return;
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    visited.insert(graph.entry());
    queue.push_back(graph.entry());

    while let Some(current) = queue.pop_front() {
        if let Some(route) = graph.route(current) {
            for target in route.targets() {
                if graph.executor(target).is_some() && visited.insert(target) {
                    queue.push_back(target);
                }
            }
        }
    }

    if !visited.contains(graph.output()) {
        errors.push(ValidationError::UnreachableOutput);
    }
}

/// Each expected fan-in type must be producible by some source in the group
fn validate_fan_in_coverage(graph: &WorkflowGraph, errors: &mut Vec<ValidationError>) {
    for group in graph.fan_ins() {
        let Some(aggregator) = graph.executor(&group.aggregator) else {
            continue;
        };
        let mut producible: HashSet<String> = HashSet::new();
        for source in &group.sources {
            if let Some(executor) = graph.executor(source) {
                producible.extend(executor.emitted_types());
            }
        }
        for spec in aggregator.handlers() {
            if !producible.contains(&spec.input) {
                errors.push(ValidationError::IncompleteFanIn {
                    aggregator: group.aggregator.clone(),
                    message_type: spec.input,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use crate::executor::{FnExecutor, HandlerOutput};
    use crate::graph::SwitchArm;
    use crate::message::Message;

    fn step(name: &str, input: &str, output: &str) -> FnExecutor {
        let output = output.to_string();
        FnExecutor::new(name).on(input, [output.clone()], move |msg, _ctx| {
            let output = output.clone();
            async move { Ok(HandlerOutput::single(Message::new(output, msg.payload))) }
        })
    }

    fn terminal(name: &str, input: &str) -> FnExecutor {
        FnExecutor::new(name).on(input, ["report"], |msg, _ctx| async move {
            Ok(HandlerOutput::single(Message::new("report", msg.payload)))
        })
    }

    #[test]
    fn test_valid_graph_has_no_errors() {
        let graph = GraphBuilder::new("wf", "Valid")
            .add_executor(step("a", "start", "mid"))
            .add_executor(terminal("b", "mid"))
            .connect("a", "b")
            .entry("a")
            .output("b")
            .build_unchecked();

        let errors = validate(&graph);
        assert!(errors.is_empty(), "Expected no errors, got: {:?}", errors);
    }

    #[test]
    fn test_missing_designations() {
        let graph = GraphBuilder::new("wf", "Bare")
            .add_executor(terminal("a", "start"))
            .build_unchecked();

        let errors = validate(&graph);
        assert!(errors.iter().any(|e| matches!(e, ValidationError::MissingEntry)));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::MissingOutput)));
    }

    #[test]
    fn test_unknown_designations() {
        let graph = GraphBuilder::new("wf", "Bad")
            .add_executor(terminal("a", "start"))
            .entry("nope")
            .output("a")
            .build_unchecked();

        let errors = validate(&graph);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::UnknownEntry { .. })));
    }

    #[test]
    fn test_dangling_route_target() {
        let graph = GraphBuilder::new("wf", "Dangling")
            .add_executor(step("a", "start", "mid"))
            .connect("a", "missing")
            .entry("a")
            .output("a")
            .build_unchecked();

        let errors = validate(&graph);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::UnknownRouteTarget { .. })));
    }

    #[test]
    fn test_type_mismatch_on_direct_edge() {
        let graph = GraphBuilder::new("wf", "Mismatch")
            .add_executor(step("a", "start", "mid"))
            .add_executor(terminal("b", "other"))
            .connect("a", "b")
            .entry("a")
            .output("b")
            .build_unchecked();

        let errors = validate(&graph);
        assert!(errors.iter().any(|e| matches!(
            e,
            ValidationError::TypeMismatch { message_type, .. } if message_type == "mid"
        )));
    }

    #[test]
    fn test_switch_allows_type_selective_arms() {
        // The validating executor emits two types; each arm carries one
        let validator = FnExecutor::new("validate")
            .on("claim.compiled", ["claim.revision", "claim.accepted"], |msg, _ctx| async move {
                Ok(HandlerOutput::single(Message::new("claim.accepted", msg.payload)))
            });

        let graph = GraphBuilder::new("wf", "Loop")
            .add_executor(
                FnExecutor::new("intake")
                    .on("claim.submitted", ["claim.compiled"], |msg, _ctx| async move {
                        Ok(HandlerOutput::single(Message::new("claim.compiled", msg.payload)))
                    })
                    .on("claim.revision", ["claim.compiled"], |msg, _ctx| async move {
                        Ok(HandlerOutput::single(Message::new("claim.compiled", msg.payload)))
                    }),
            )
            .add_executor(validator)
            .add_executor(terminal("archive", "claim.accepted"))
            .connect("intake", "validate")
            .branch(
                "validate",
                vec![
                    SwitchArm::new("retry", "intake", |m: &Message| m.is("claim.revision")),
                    SwitchArm::new("proceed", "archive", |m: &Message| m.is("claim.accepted")),
                ],
            )
            .entry("intake")
            .output("archive")
            .build_unchecked();

        let errors = validate(&graph);
        assert!(errors.is_empty(), "Expected no errors, got: {:?}", errors);
    }

    #[test]
    fn test_dead_arm_detected() {
        let graph = GraphBuilder::new("wf", "DeadArm")
            .add_executor(step("a", "start", "mid"))
            .add_executor(terminal("b", "mid"))
            .add_executor(terminal("c", "unrelated"))
            .branch(
                "a",
                vec![
                    SwitchArm::always("good", "b"),
                    SwitchArm::always("dead", "c"),
                ],
            )
            .connect("c", "b")
            .entry("a")
            .output("b")
            .build_unchecked();

        let errors = validate(&graph);
        assert!(errors.iter().any(|e| matches!(
            e,
            ValidationError::DeadArm { label, .. } if label == "dead"
        )));
    }

    #[test]
    fn test_dead_end_and_sink_route() {
        let graph = GraphBuilder::new("wf", "Ends")
            .add_executor(step("a", "start", "mid"))
            .add_executor(terminal("b", "mid"))
            .add_executor(terminal("c", "mid"))
            .connect("a", "b")
            .connect("b", "c")
            .entry("a")
            .output("b")
            .build_unchecked();

        let errors = validate(&graph);
        // "b" is the sink but routes onward; "c" is not the sink and has no route
        assert!(errors.iter().any(|e| matches!(e, ValidationError::SinkHasRoute { .. })));
        assert!(errors.iter().any(|e| matches!(
            e,
            ValidationError::DeadEnd { executor } if executor == "c"
        )));
    }

    #[test]
    fn test_unreachable_output() {
        let graph = GraphBuilder::new("wf", "Island")
            .add_executor(step("a", "start", "mid"))
            .add_executor(terminal("b", "mid"))
            .add_executor(terminal("island", "mid"))
            .connect("a", "b")
            .entry("a")
            .output("island")
            .build_unchecked();

        let errors = validate(&graph);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::UnreachableOutput)));
    }

    #[test]
    fn test_empty_switch_and_fan_out() {
        let graph = GraphBuilder::new("wf", "Empty")
            .add_executor(step("a", "start", "mid"))
            .add_executor(step("b", "start", "mid"))
            .add_executor(terminal("c", "mid"))
            .branch("a", vec![])
            .fan_out("b", Vec::<String>::new())
            .entry("a")
            .output("c")
            .build_unchecked();

        let errors = validate(&graph);
        assert!(errors.iter().any(|e| matches!(e, ValidationError::EmptySwitch { .. })));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::EmptyFanOut { .. })));
    }

    #[test]
    fn test_repeated_fan_out_target_requires_shareable() {
        let graph = GraphBuilder::new("wf", "Repeat")
            .add_executor(step("src", "start", "work"))
            .add_executor(terminal("worker", "work"))
            .fan_out("src", ["worker", "worker"])
            .entry("src")
            .output("worker")
            .build_unchecked();

        let errors = validate(&graph);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::UnsharedFanOutTarget { .. })));

        // Marking the worker shareable clears the error
        let graph = GraphBuilder::new("wf", "Repeat")
            .add_executor(step("src", "start", "work"))
            .add_executor(
                FnExecutor::new("worker")
                    .on("work", ["report"], |msg, _ctx| async move {
                        Ok(HandlerOutput::single(Message::new("report", msg.payload)))
                    })
                    .shared(),
            )
            .fan_out("src", ["worker", "worker"])
            .entry("src")
            .output("worker")
            .build_unchecked();

        let errors = validate(&graph);
        assert!(!errors
            .iter()
            .any(|e| matches!(e, ValidationError::UnsharedFanOutTarget { .. })));
    }

    #[test]
    fn test_incomplete_fan_in() {
        let aggregator = FnExecutor::new("agg")
            .on("finding.a", ["combined"], |_m, _c| async move {
                Ok(HandlerOutput::Wait)
            })
            .on("finding.b", ["combined"], |_m, _c| async move {
                Ok(HandlerOutput::Wait)
            });

        let graph = GraphBuilder::new("wf", "Partial")
            .add_executor(step("only", "start", "finding.a"))
            .add_executor(aggregator)
            .add_executor(terminal("out", "combined"))
            .fan_in(["only"], "agg")
            .connect("agg", "out")
            .entry("only")
            .output("out")
            .build_unchecked();

        let errors = validate(&graph);
        assert!(errors.iter().any(|e| matches!(
            e,
            ValidationError::IncompleteFanIn { message_type, .. } if message_type == "finding.b"
        )));
    }
}
