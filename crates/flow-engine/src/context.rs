//! Per-run execution context
//!
//! A `RunContext` is created when a run starts and discarded when it ends.
//! It carries everything a handler may touch beyond its input message:
//! the run-scoped state store, the cancellation signal, the iteration
//! counters that bound cyclical sub-graphs, and progress emission.
//!
//! Cloning is cheap (shared inner) so the same context flows into every
//! handler invocation of the run, including concurrent fan-out branches.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::events::{EventSink, NullEventSink, RunEvent};
use crate::state::StateStore;

/// Iteration cap used by detached contexts
const DEFAULT_ITERATION_CAP: u32 = 10;

/// Per-run handle passed into every handler invocation
#[derive(Clone)]
pub struct RunContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    run_id: String,
    state: StateStore,
    cancel: CancellationToken,
    iterations: Mutex<HashMap<String, u32>>,
    iteration_cap: u32,
    sink: Arc<dyn EventSink>,
}

impl RunContext {
    pub(crate) fn new(
        run_id: String,
        state: StateStore,
        cancel: CancellationToken,
        iteration_cap: u32,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                run_id,
                state,
                cancel,
                iterations: Mutex::new(HashMap::new()),
                iteration_cap,
                sink,
            }),
        }
    }

    /// Standalone context for tests and direct executor invocation
    ///
    /// Uses a fresh state store, a fresh cancellation token, and discards
    /// progress events.
    pub fn detached() -> Self {
        Self::new(
            format!("run-{}", uuid::Uuid::new_v4()),
            StateStore::new(),
            CancellationToken::new(),
            DEFAULT_ITERATION_CAP,
            Arc::new(NullEventSink),
        )
    }

    /// Identifier of the run this context belongs to
    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    /// The run's state store
    pub fn state(&self) -> &StateStore {
        &self.inner.state
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Resolve when cancellation is requested
    pub async fn cancelled(&self) {
        self.inner.cancel.cancelled().await;
    }

    /// Current value of a named iteration counter (0 if never advanced)
    pub fn iteration(&self, counter: &str) -> u32 {
        self.inner
            .iterations
            .lock()
            .get(counter)
            .copied()
            .unwrap_or(0)
    }

    /// Increment and return a named iteration counter
    ///
    /// Counters are monotonically increasing for the lifetime of the run.
    pub fn advance_iteration(&self, counter: &str) -> u32 {
        let mut iterations = self.inner.iterations.lock();
        let count = iterations.entry(counter.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Whether the counter has reached the configured iteration cap
    ///
    /// A validating executor in a cycle checks this to force the forward
    /// branch once the cap is hit, guaranteeing the run terminates.
    pub fn cap_reached(&self, counter: &str) -> bool {
        self.iteration(counter) >= self.inner.iteration_cap
    }

    /// The configured iteration cap
    pub fn iteration_cap(&self) -> u32 {
        self.inner.iteration_cap
    }

    /// Emit a progress/partial-output event on the run's event channel
    pub fn emit_progress(&self, source: &str, data: Value) {
        let event = RunEvent::Progress {
            run_id: self.inner.run_id.clone(),
            executor: source.to_string(),
            data,
        };
        if self.inner.sink.send(event).is_err() {
            log::debug!("progress receiver dropped for run {}", self.inner.run_id);
        }
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.inner.run_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::VecEventSink;

    #[test]
    fn test_iteration_counters() {
        let ctx = RunContext::detached();

        assert_eq!(ctx.iteration("intake"), 0);
        assert_eq!(ctx.advance_iteration("intake"), 1);
        assert_eq!(ctx.advance_iteration("intake"), 2);
        assert_eq!(ctx.iteration("intake"), 2);

        // Counters are independent of each other
        assert_eq!(ctx.iteration("review"), 0);
    }

    #[test]
    fn test_cap_reached() {
        let sink = Arc::new(VecEventSink::new());
        let ctx = RunContext::new(
            "run-test".to_string(),
            StateStore::new(),
            CancellationToken::new(),
            3,
            sink,
        );

        for _ in 0..2 {
            ctx.advance_iteration("intake");
        }
        assert!(!ctx.cap_reached("intake"));

        ctx.advance_iteration("intake");
        assert!(ctx.cap_reached("intake"));
        assert_eq!(ctx.iteration_cap(), 3);
    }

    #[test]
    fn test_emit_progress() {
        let sink = Arc::new(VecEventSink::new());
        let ctx = RunContext::new(
            "run-test".to_string(),
            StateStore::new(),
            CancellationToken::new(),
            DEFAULT_ITERATION_CAP,
            sink.clone(),
        );

        ctx.emit_progress("intake", serde_json::json!({"pct": 50}));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            RunEvent::Progress { executor, .. } => assert_eq!(executor, "intake"),
            _ => panic!("Expected Progress event"),
        }
    }

    #[tokio::test]
    async fn test_cancellation_flag() {
        let token = CancellationToken::new();
        let ctx = RunContext::new(
            "run-test".to_string(),
            StateStore::new(),
            token.clone(),
            DEFAULT_ITERATION_CAP,
            Arc::new(NullEventSink),
        );

        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
        // Resolves immediately once cancelled
        ctx.cancelled().await;
    }
}
