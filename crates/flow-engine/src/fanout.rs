//! Fan-out dispatch executor
//!
//! A `FanOutDispatcher` sits in front of a fan-out route. It re-emits its
//! input, optionally enriched or substituted from the state store first,
//! and the route then copies the message by value to every target, whose
//! handlers run concurrently.
//!
//! State-scope discipline: the dispatcher may read shared state *before*
//! dispatch; the fan-out targets must not read or write entries that the
//! downstream aggregator also writes.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use crate::context::RunContext;
use crate::error::Result;
use crate::executor::{Executor, HandlerOutput, HandlerSpec};
use crate::message::{Message, MessageType};

type EnrichFuture = Pin<Box<dyn Future<Output = Result<Message>> + Send>>;
type EnrichFn = Box<dyn Fn(Message, RunContext) -> EnrichFuture + Send + Sync>;

/// Executor that triggers a fan-out, optionally enriching the message first
///
/// Enrichment must preserve the message type; the emitted type is part of
/// the declared contract checked at build time.
pub struct FanOutDispatcher {
    name: String,
    input: MessageType,
    enrich: Option<EnrichFn>,
}

impl FanOutDispatcher {
    /// Create a pass-through dispatcher for one message type
    pub fn new(name: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input: input.into(),
            enrich: None,
        }
    }

    /// Enrich or substitute the message before dispatch (may read state)
    pub fn with_enrich<F, Fut>(mut self, func: F) -> Self
    where
        F: Fn(Message, RunContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Message>> + Send + 'static,
    {
        self.enrich = Some(Box::new(move |message, ctx| -> EnrichFuture {
            Box::pin(func(message, ctx))
        }));
        self
    }
}

#[async_trait]
impl Executor for FanOutDispatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn handlers(&self) -> Vec<HandlerSpec> {
        vec![HandlerSpec::new(self.input.clone(), [self.input.clone()])]
    }

    fn shareable(&self) -> bool {
        true
    }

    async fn handle(&self, message: Message, ctx: RunContext) -> Result<HandlerOutput> {
        let message = match &self.enrich {
            Some(enrich) => enrich(message, ctx).await?,
            None => message,
        };
        Ok(HandlerOutput::single(message.with_source(self.name.clone())))
    }
}
