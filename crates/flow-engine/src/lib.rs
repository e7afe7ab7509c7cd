//! Flow Engine - Typed-message workflow orchestration for Switchyard
//!
//! This crate provides a typed-message dispatch engine that routes data
//! between independent processing units (executors). It supports:
//!
//! - Typed handler registration with build-time contract checking
//! - Conditional routing via switches (ordered predicate arms)
//! - Fan-out dispatch to concurrent branches
//! - Fan-in barrier aggregation over heterogeneous payload types
//! - Bounded iterative refinement loops (retry-with-feedback, capped)
//! - A scoped key/value state store with per-scope serialized access
//!
//! # Architecture
//!
//! A `WorkflowGraph` composes executors and routes; `GraphBuilder`
//! validates the composition at build time, so structural defects never
//! surface mid-run. The `Runner` drives a run from the entry executor to
//! the designated sink, streaming `RunEvent`s and ending every run with
//! exactly one terminal event (final output or failure).
//!
//! Business logic stays behind the handler contract: the engine compiles
//! and tests with purely synthetic task functions.
//!
//! # Example
//!
//! ```ignore
//! use flow_engine::{FnExecutor, GraphBuilder, HandlerOutput, Message, Runner};
//!
//! let graph = GraphBuilder::new("claims", "Claims Intake")
//!     .add_executor(intake)
//!     .add_executor(archive)
//!     .connect("intake", "archive")
//!     .entry("intake")
//!     .output("archive")
//!     .build()?;
//!
//! let handle = Runner::new().start(graph.into(), initial);
//! ```

pub mod aggregator;
pub mod builder;
pub mod context;
pub mod error;
pub mod events;
pub mod executor;
pub mod fanout;
pub mod graph;
pub mod message;
pub mod runner;
pub mod state;
pub mod validation;

// Re-export key types
pub use aggregator::FanInAggregator;
pub use builder::GraphBuilder;
pub use context::RunContext;
pub use error::{FlowEngineError, Result};
pub use events::{ChannelEventSink, EventSink, NullEventSink, RunEvent, VecEventSink};
pub use executor::{Executor, FnExecutor, HandlerOutput, HandlerSpec};
pub use fanout::FanOutDispatcher;
pub use graph::{FanInGroup, Route, RoutePredicate, SwitchArm, WorkflowGraph};
pub use message::{ExecutorId, Message, MessageType};
pub use runner::{RunConfig, RunHandle, Runner};
pub use state::StateStore;
pub use validation::{validate, ValidationError};
