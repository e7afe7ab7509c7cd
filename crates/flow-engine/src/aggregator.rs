//! Heterogeneous fan-in barrier
//!
//! A `FanInAggregator` declares a fixed set of expected payload types and
//! collects exactly one message of each, regardless of arrival order.
//! Until the set is complete every arrival parks with a `Wait` signal;
//! the arrival that completes the set takes the collected slots, resets
//! the barrier for reuse, and emits a single combined message downstream.
//!
//! Fan-out branches may call the same instance concurrently, so the
//! insert / distinct-count check / take-on-complete sequence is a single
//! critical section: the aggregator fires at most once per complete set
//! and never on a partial one.
//!
//! State-scope discipline: branch executors feeding an aggregator must
//! not read or write the state entries the aggregator writes; for a given
//! sub-graph only the fan-out dispatcher and the aggregator touch that
//! shared scope.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::context::RunContext;
use crate::error::Result;
use crate::executor::{Executor, HandlerOutput, HandlerSpec};
use crate::message::{Message, MessageType};

/// Barrier executor collecting one message per expected type
pub struct FanInAggregator {
    name: String,
    expected: Vec<MessageType>,
    output_type: MessageType,
    state_target: (String, String),
    inner: Mutex<AggregationState>,
}

#[derive(Default)]
struct AggregationState {
    /// Collected payloads, one slot per expected type
    slots: HashMap<MessageType, Value>,
    /// Total arrivals since the last fire, duplicates included
    received: u32,
}

impl FanInAggregator {
    /// Create an aggregator expecting one message of each given type
    pub fn new<I, S>(
        name: impl Into<String>,
        expected: I,
        output_type: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let state_target = (name.clone(), "collected".to_string());
        Self {
            name,
            expected: expected.into_iter().map(Into::into).collect(),
            output_type: output_type.into(),
            state_target,
            inner: Mutex::new(AggregationState::default()),
        }
    }

    /// Write the combined set to `(scope, key)` when firing instead of
    /// the default `(aggregator name, "collected")`
    pub fn with_state_target(
        mut self,
        scope: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        self.state_target = (scope.into(), key.into());
        self
    }

    /// Number of distinct types currently held (diagnostics)
    pub fn pending(&self) -> usize {
        self.inner.lock().slots.len()
    }
}

#[async_trait]
impl Executor for FanInAggregator {
    fn name(&self) -> &str {
        &self.name
    }

    fn handlers(&self) -> Vec<HandlerSpec> {
        self.expected
            .iter()
            .map(|t| HandlerSpec::new(t.clone(), [self.output_type.clone()]))
            .collect()
    }

    async fn handle(&self, message: Message, ctx: RunContext) -> Result<HandlerOutput> {
        // Single-flight: slot insert, distinct-count check, and take-on-
        // complete all happen under one lock, so only the arrival that
        // completes the set leaves with the collected slots.
        let collected = {
            let mut state = self.inner.lock();
            state.received += 1;
            if state
                .slots
                .insert(message.message_type.clone(), message.payload)
                .is_some()
            {
                log::warn!(
                    "aggregator '{}' received duplicate '{}' before firing; keeping the latest",
                    self.name,
                    message.message_type
                );
            }
            if state.slots.len() == self.expected.len() {
                let slots = std::mem::take(&mut state.slots);
                state.received = 0;
                Some(slots)
            } else {
                log::debug!(
                    "aggregator '{}' holding {}/{} types",
                    self.name,
                    state.slots.len(),
                    self.expected.len()
                );
                None
            }
        };

        let Some(slots) = collected else {
            return Ok(HandlerOutput::Wait);
        };

        let combined = Value::Object(slots.into_iter().collect());
        let (scope, key) = &self.state_target;
        ctx.state().write(scope, key, combined.clone()).await;

        Ok(HandlerOutput::single(
            Message::new(self.output_type.clone(), combined).with_source(self.name.clone()),
        ))
    }

    async fn reset(&self) {
        let mut state = self.inner.lock();
        state.slots.clear();
        state.received = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn finding(kind: &str, score: f64) -> Message {
        Message::new(
            format!("finding.{}", kind),
            serde_json::json!({"score": score}),
        )
    }

    fn three_way() -> FanInAggregator {
        FanInAggregator::new(
            "assemble",
            ["finding.behavior", "finding.identity", "finding.history"],
            "case.assessed",
        )
    }

    async fn feed(
        aggregator: &FanInAggregator,
        ctx: &RunContext,
        order: [&str; 3],
    ) -> Message {
        let mut fired = None;
        for (i, kind) in order.into_iter().enumerate() {
            let out = aggregator
                .handle(finding(kind, i as f64), ctx.clone())
                .await
                .unwrap();
            match out {
                HandlerOutput::Wait => assert!(i < 2, "fired early"),
                HandlerOutput::Messages(mut messages) => {
                    assert_eq!(i, 2, "fired before the set was complete");
                    assert_eq!(messages.len(), 1);
                    fired = Some(messages.remove(0));
                }
            }
        }
        fired.expect("aggregator never fired")
    }

    #[tokio::test]
    async fn test_fires_once_regardless_of_order() {
        let ctx = RunContext::detached();

        // Each permutation yields a combined object with the same keys
        for order in [
            ["behavior", "identity", "history"],
            ["history", "behavior", "identity"],
            ["identity", "history", "behavior"],
        ] {
            let aggregator = three_way();
            let result = feed(&aggregator, &ctx, order).await;
            assert!(result.is("case.assessed"));
            let combined = result.payload.as_object().unwrap();
            assert_eq!(combined.len(), 3);
            assert!(combined.contains_key("finding.behavior"));
            assert!(combined.contains_key("finding.identity"));
            assert!(combined.contains_key("finding.history"));
        }
    }

    #[tokio::test]
    async fn test_never_fires_on_partial_set() {
        let ctx = RunContext::detached();
        let aggregator = three_way();

        for kind in ["behavior", "identity"] {
            let out = aggregator
                .handle(finding(kind, 0.0), ctx.clone())
                .await
                .unwrap();
            assert!(matches!(out, HandlerOutput::Wait));
        }
        assert_eq!(aggregator.pending(), 2);
    }

    #[tokio::test]
    async fn test_resets_for_reuse_after_firing() {
        let ctx = RunContext::detached();
        let aggregator = three_way();

        feed(&aggregator, &ctx, ["behavior", "identity", "history"]).await;
        assert_eq!(aggregator.pending(), 0);

        // A second complete set fires again
        let result = feed(&aggregator, &ctx, ["identity", "behavior", "history"]).await;
        assert!(result.is("case.assessed"));
    }

    #[tokio::test]
    async fn test_duplicate_keeps_latest_without_firing() {
        let ctx = RunContext::detached();
        let aggregator = three_way();

        aggregator
            .handle(finding("behavior", 0.1), ctx.clone())
            .await
            .unwrap();
        // Duplicate type before firing: slot overwritten, still partial
        let out = aggregator
            .handle(finding("behavior", 0.9), ctx.clone())
            .await
            .unwrap();
        assert!(matches!(out, HandlerOutput::Wait));
        assert_eq!(aggregator.pending(), 1);

        aggregator
            .handle(finding("identity", 0.2), ctx.clone())
            .await
            .unwrap();
        let result = feed_last(&aggregator, &ctx).await;
        let combined = result.payload.as_object().unwrap();
        assert_eq!(
            combined["finding.behavior"],
            serde_json::json!({"score": 0.9})
        );
    }

    async fn feed_last(aggregator: &FanInAggregator, ctx: &RunContext) -> Message {
        match aggregator
            .handle(finding("history", 0.3), ctx.clone())
            .await
            .unwrap()
        {
            HandlerOutput::Messages(mut m) => m.remove(0),
            HandlerOutput::Wait => panic!("expected fire"),
        }
    }

    #[tokio::test]
    async fn test_writes_combined_set_to_state() {
        let ctx = RunContext::detached();
        let aggregator = three_way().with_state_target("fraud", "findings");

        feed(&aggregator, &ctx, ["behavior", "identity", "history"]).await;

        let stored = ctx.state().read("fraud", "findings").await;
        assert_eq!(stored.as_object().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_default_state_target_is_own_scope() {
        let ctx = RunContext::detached();
        let aggregator = three_way();

        feed(&aggregator, &ctx, ["behavior", "identity", "history"]).await;

        let stored = ctx.state().read("assemble", "collected").await;
        assert_eq!(stored.as_object().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_arrivals_fire_exactly_once() {
        let ctx = RunContext::detached();
        let aggregator = Arc::new(three_way());

        let mut tasks = Vec::new();
        for kind in ["behavior", "identity", "history"] {
            let aggregator = aggregator.clone();
            let ctx = ctx.clone();
            tasks.push(tokio::spawn(async move {
                aggregator.handle(finding(kind, 0.5), ctx).await.unwrap()
            }));
        }

        let mut fires = 0;
        for task in tasks {
            if let HandlerOutput::Messages(_) = task.await.unwrap() {
                fires += 1;
            }
        }
        assert_eq!(fires, 1);
        assert_eq!(aggregator.pending(), 0);
    }

    #[tokio::test]
    async fn test_reset_clears_partial_state() {
        let ctx = RunContext::detached();
        let aggregator = three_way();

        aggregator
            .handle(finding("behavior", 0.1), ctx.clone())
            .await
            .unwrap();
        assert_eq!(aggregator.pending(), 1);

        aggregator.reset().await;
        assert_eq!(aggregator.pending(), 0);
    }

    #[test]
    fn test_declared_contract() {
        let aggregator = three_way();
        let handlers = aggregator.handlers();
        assert_eq!(handlers.len(), 3);
        assert!(aggregator.accepts("finding.identity"));
        assert!(!aggregator.accepts("case.assessed"));
        assert_eq!(
            aggregator.emitted_types(),
            vec!["case.assessed".to_string()]
        );
    }
}
