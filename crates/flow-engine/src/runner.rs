//! Drives one execution of a workflow graph
//!
//! The runner injects the initial message into the entry executor and
//! follows routes until the sink executor emits, streaming events along
//! the way. Plain edges and switches advance sequentially in order;
//! fan-out targets run concurrently on a `JoinSet` and may complete in
//! any order. A global dispatch budget (the liveness backstop for
//! cyclical graphs) and an optional per-invocation timeout bound every
//! run; a cancellation token propagates to all in-flight handlers.
//!
//! Failure semantics: a handler error inside a fan-out is a per-branch
//! failure, reported on the event channel while siblings continue;
//! anywhere else it is fatal. Routing errors, budget exhaustion, and
//! cancellation are always fatal. Every run terminates with exactly one
//! of `Output` or `RunFailed`.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::context::RunContext;
use crate::error::{FlowEngineError, Result};
use crate::events::{ChannelEventSink, EventSink, RunEvent};
use crate::executor::{Executor, HandlerOutput};
use crate::graph::{Route, WorkflowGraph};
use crate::message::{ExecutorId, Message};
use crate::state::StateStore;

/// Tunables for a single run
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Upper bound on executor invocations per run (liveness backstop)
    pub max_dispatches: u32,
    /// Cap consulted by `RunContext::cap_reached` for cyclical sub-graphs
    pub iteration_cap: u32,
    /// Optional timeout applied to every handler invocation
    ///
    /// Expiry is a handler error: per-branch inside a fan-out, fatal
    /// elsewhere. `None` disables the timeout.
    pub handler_timeout: Option<Duration>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_dispatches: 1000,
            iteration_cap: 10,
            handler_timeout: None,
        }
    }
}

/// Drives workflow runs against built graphs
pub struct Runner {
    config: RunConfig,
    state: Option<StateStore>,
}

impl Runner {
    /// Create a runner with the default configuration
    pub fn new() -> Self {
        Self {
            config: RunConfig::default(),
            state: None,
        }
    }

    /// Replace the run configuration
    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a longer-lived state store instead of a fresh per-run one
    pub fn with_state(mut self, state: StateStore) -> Self {
        self.state = Some(state);
        self
    }

    /// Start a run in the background, returning a handle with the event
    /// stream
    pub fn start(&self, graph: Arc<WorkflowGraph>, input: Message) -> RunHandle {
        let (sink, events) = ChannelEventSink::new();
        let cancel = CancellationToken::new();
        let driver = self.driver(graph, Arc::new(sink), cancel.clone());
        let run_id = driver.run_id.clone();
        let join = tokio::spawn(async move {
            // The outcome is reported through the event stream
            let _ = driver.drive(input).await;
        });
        RunHandle {
            run_id,
            events,
            cancel,
            join,
        }
    }

    /// Drive a run to completion inline against a caller-supplied sink,
    /// returning the final output messages
    pub async fn run_to_completion(
        &self,
        graph: Arc<WorkflowGraph>,
        input: Message,
        sink: Arc<dyn EventSink>,
    ) -> Result<Vec<Message>> {
        let driver = self.driver(graph, sink, CancellationToken::new());
        driver.drive(input).await
    }

    fn driver(
        &self,
        graph: Arc<WorkflowGraph>,
        sink: Arc<dyn EventSink>,
        cancel: CancellationToken,
    ) -> Arc<RunDriver> {
        let run_id = format!("run-{}", uuid::Uuid::new_v4());
        let state = self.state.clone().unwrap_or_default();
        let ctx = RunContext::new(
            run_id.clone(),
            state,
            cancel,
            self.config.iteration_cap,
            sink.clone(),
        );
        Arc::new(RunDriver {
            graph,
            config: self.config.clone(),
            ctx,
            sink,
            run_id,
            dispatched: AtomicU32::new(0),
            output: parking_lot::Mutex::new(None),
        })
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running workflow execution
pub struct RunHandle {
    run_id: String,
    events: mpsc::UnboundedReceiver<RunEvent>,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl RunHandle {
    /// Identifier of this run
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Receive the next event; `None` once the stream has ended
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        self.events.recv().await
    }

    /// Signal cancellation to all in-flight handler invocations
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Clone the cancellation token (e.g. to keep after `into_stream`)
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Convert into a `Stream` of events
    pub fn into_stream(self) -> UnboundedReceiverStream<RunEvent> {
        UnboundedReceiverStream::new(self.events)
    }

    /// Collect every remaining event until the stream ends
    pub async fn drain(mut self) -> Vec<RunEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        let _ = self.join.await;
        events
    }
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

/// Per-run driver shared across the concurrent delivery chains
struct RunDriver {
    graph: Arc<WorkflowGraph>,
    config: RunConfig,
    ctx: RunContext,
    sink: Arc<dyn EventSink>,
    run_id: String,
    dispatched: AtomicU32,
    output: parking_lot::Mutex<Option<Vec<Message>>>,
}

impl RunDriver {
    async fn drive(self: Arc<Self>, input: Message) -> Result<Vec<Message>> {
        log::info!(
            "run {} started on graph '{}'",
            self.run_id,
            self.graph.id()
        );
        self.emit(RunEvent::RunStarted {
            run_id: self.run_id.clone(),
            graph_id: self.graph.id().to_string(),
        });

        // The initial message type is data-dependent and cannot be
        // checked at build time
        let entry = self.graph.entry().to_string();
        let accepted = self
            .graph
            .executor(&entry)
            .map(|e| e.accepts(&input.message_type))
            .unwrap_or(false);

        let result = if accepted {
            self.clone().deliver(entry, input).await
        } else {
            Err(FlowEngineError::routing(
                entry.clone(),
                format!(
                    "entry executor cannot handle initial message type '{}'",
                    input.message_type
                ),
            ))
        };

        let outcome = match result {
            Ok(()) => self.output.lock().take().ok_or(FlowEngineError::Stalled),
            Err(error) => Err(error),
        };

        match &outcome {
            Ok(messages) => {
                log::info!(
                    "run {} completed with {} output message(s)",
                    self.run_id,
                    messages.len()
                );
                self.emit(RunEvent::Output {
                    run_id: self.run_id.clone(),
                    messages: messages.clone(),
                });
            }
            Err(error) => {
                log::warn!("run {} failed: {}", self.run_id, error);
                // Free aggregator slots and other private executor state
                // so the graph instance can be reused
                self.graph.reset_all().await;
                self.emit(RunEvent::RunFailed {
                    run_id: self.run_id.clone(),
                    error: error.to_string(),
                });
            }
        }
        outcome
    }

    /// Deliver one message and follow its routes until every resulting
    /// chain ends (sink reached, barrier holding, or nothing emitted)
    fn deliver(
        self: Arc<Self>,
        first: ExecutorId,
        message: Message,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        Box::pin(async move {
            let mut pending: VecDeque<(ExecutorId, Message)> = VecDeque::new();
            pending.push_back((first, message));

            while let Some((id, message)) = pending.pop_front() {
                if self.ctx.is_cancelled() {
                    return Err(FlowEngineError::Cancelled);
                }
                let dispatched = self.dispatched.fetch_add(1, Ordering::Relaxed);
                if dispatched >= self.config.max_dispatches {
                    return Err(FlowEngineError::BudgetExhausted(self.config.max_dispatches));
                }

                let executor = self
                    .graph
                    .executor(&id)
                    .ok_or_else(|| {
                        FlowEngineError::routing(id.clone(), "executor not present in graph")
                    })?
                    .clone();
                if !executor.accepts(&message.message_type) {
                    return Err(FlowEngineError::routing(
                        id.clone(),
                        format!(
                            "executor emitted undeclared message type '{}'",
                            message.message_type
                        ),
                    ));
                }

                self.emit(RunEvent::ExecutorStarted {
                    run_id: self.run_id.clone(),
                    executor: id.clone(),
                    message_type: message.message_type.clone(),
                });

                let output = match self.invoke(&executor, message).await {
                    Ok(output) => output,
                    Err(FlowEngineError::Cancelled) => return Err(FlowEngineError::Cancelled),
                    Err(error) => {
                        self.emit(RunEvent::ExecutorFailed {
                            run_id: self.run_id.clone(),
                            executor: id.clone(),
                            error: error.to_string(),
                        });
                        log::warn!("run {}: executor '{}' failed: {}", self.run_id, id, error);
                        return Err(error);
                    }
                };

                let messages = match output {
                    HandlerOutput::Wait => {
                        self.emit(RunEvent::ExecutorWaiting {
                            run_id: self.run_id.clone(),
                            executor: id.clone(),
                        });
                        continue;
                    }
                    HandlerOutput::Messages(messages) => {
                        self.emit(RunEvent::ExecutorCompleted {
                            run_id: self.run_id.clone(),
                            executor: id.clone(),
                            emitted: messages.len(),
                        });
                        messages
                    }
                };

                // The sink's emissions are the final output; its chain
                // ends here
                if id == self.graph.output() {
                    let mut slot = self.output.lock();
                    match slot.as_mut() {
                        Some(existing) => existing.extend(messages),
                        None => *slot = Some(messages),
                    }
                    continue;
                }
                if messages.is_empty() {
                    continue;
                }

                let Some(route) = self.graph.route(&id) else {
                    return Err(FlowEngineError::routing(id.clone(), "no outgoing route"));
                };

                for message in messages {
                    match route {
                        Route::Direct { target } => {
                            pending.push_back((target.clone(), message));
                        }
                        Route::Switch { arms } => {
                            match arms.iter().find(|arm| arm.matches(&message)) {
                                Some(arm) => {
                                    log::debug!(
                                        "run {}: switch at '{}' selected arm '{}'",
                                        self.run_id,
                                        id,
                                        arm.label
                                    );
                                    pending.push_back((arm.target.clone(), message));
                                }
                                None => {
                                    return Err(FlowEngineError::routing(
                                        id.clone(),
                                        format!(
                                            "no switch arm matched message type '{}'",
                                            message.message_type
                                        ),
                                    ));
                                }
                            }
                        }
                        Route::FanOut { targets } => {
                            log::debug!(
                                "run {}: fanning out '{}' from '{}' to {} targets",
                                self.run_id,
                                message.message_type,
                                id,
                                targets.len()
                            );
                            let mut branches: JoinSet<(ExecutorId, Result<()>)> = JoinSet::new();
                            for target in targets {
                                let driver = self.clone();
                                // Each branch gets its own copy of the message
                                let copy = message.clone();
                                let target = target.clone();
                                branches.spawn(async move {
                                    let result = driver.deliver(target.clone(), copy).await;
                                    (target, result)
                                });
                            }

                            let mut fatal: Option<FlowEngineError> = None;
                            while let Some(joined) = branches.join_next().await {
                                match joined {
                                    Ok((_, Ok(()))) => {}
                                    Ok((target, Err(FlowEngineError::Handler { .. }))) => {
                                        // Reported on the event channel by the
                                        // failing chain; siblings continue
                                        log::warn!(
                                            "run {}: fan-out branch '{}' failed; siblings continue",
                                            self.run_id,
                                            target
                                        );
                                    }
                                    Ok((_, Err(error))) => {
                                        if fatal.is_none() {
                                            fatal = Some(error);
                                        }
                                    }
                                    Err(join_error) => {
                                        self.emit(RunEvent::ExecutorFailed {
                                            run_id: self.run_id.clone(),
                                            executor: id.clone(),
                                            error: format!(
                                                "fan-out branch task failed: {}",
                                                join_error
                                            ),
                                        });
                                        log::error!(
                                            "run {}: fan-out branch task failed: {}",
                                            self.run_id,
                                            join_error
                                        );
                                    }
                                }
                            }
                            if let Some(error) = fatal {
                                return Err(error);
                            }
                        }
                    }
                }
            }
            Ok(())
        })
    }

    /// Invoke one handler, racing cancellation and the optional timeout
    ///
    /// Normalizes every failure except cancellation into a handler error
    /// attributed to the invoked executor.
    async fn invoke(
        &self,
        executor: &Arc<dyn Executor>,
        message: Message,
    ) -> Result<HandlerOutput> {
        let name = executor.name().to_string();
        let handler = executor.handle(message, self.ctx.clone());
        let guarded = async {
            match self.config.handler_timeout {
                Some(limit) => match tokio::time::timeout(limit, handler).await {
                    Ok(result) => result,
                    Err(_) => Err(FlowEngineError::handler(
                        name.clone(),
                        format!("timed out after {:?}", limit),
                    )),
                },
                None => handler.await,
            }
        };

        tokio::select! {
            _ = self.ctx.cancelled() => Err(FlowEngineError::Cancelled),
            result = guarded => match result {
                Ok(output) => Ok(output),
                Err(FlowEngineError::Cancelled) => Err(FlowEngineError::Cancelled),
                Err(FlowEngineError::Handler { executor, message }) => {
                    Err(FlowEngineError::Handler { executor, message })
                }
                Err(other) => Err(FlowEngineError::handler(name.clone(), other.to_string())),
            },
        }
    }

    fn emit(&self, event: RunEvent) {
        if self.sink.send(event).is_err() {
            log::debug!("event receiver dropped for run {}", self.run_id);
        }
    }
}
