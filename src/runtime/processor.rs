//! Seam to whatever actually runs a node (prompt rendering, model calls,
//! tool invocation). The engine only routes steps to it.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    Result,
    graph::{NodeId, Step},
    runtime::Context,
};

#[async_trait]
pub trait NodeProcessor: Send + Sync {
    /// Runs `step` on the branch owning `ctx`. `context` is the branch's
    /// pending context, already consumed. Earlier turns, including those
    /// inherited on fork, are in [`Context::conversation`]. A returned value is recorded as a
    /// response of the branch and as the node's output.
    async fn process(
        &self,
        ctx: &Context,
        step: &Step,
        context: Option<Value>,
    ) -> Result<Option<Value>>;
}

/// Processor that answers every step with its `content` payload (or its id
/// when there is none) and remembers what it saw.
#[derive(Debug, Default)]
pub struct RecordingProcessor {
    seen: Mutex<Vec<Seen>>,
}

#[derive(Debug)]
struct Seen {
    nid: NodeId,
    context: Option<Value>,
    conversation: Vec<Value>,
}

impl RecordingProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of processed steps, in processing order.
    pub fn processed(&self) -> Vec<NodeId> {
        self.seen.lock().map(|seen| seen.iter().map(|s| s.nid.clone()).collect()).unwrap_or_default()
    }

    /// Context received by the first processing of `nid`.
    pub fn context_of(
        &self,
        nid: &str,
    ) -> Option<Value> {
        self.seen.lock().ok()?.iter().find(|s| s.nid == nid).and_then(|s| s.context.clone())
    }

    /// Conversation the branch had when `nid` was first processed.
    pub fn conversation_of(
        &self,
        nid: &str,
    ) -> Option<Vec<Value>> {
        self.seen.lock().ok()?.iter().find(|s| s.nid == nid).map(|s| s.conversation.clone())
    }
}

#[async_trait]
impl NodeProcessor for RecordingProcessor {
    async fn process(
        &self,
        ctx: &Context,
        step: &Step,
        context: Option<Value>,
    ) -> Result<Option<Value>> {
        let node = step.node();
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(Seen {
                nid: node.id.clone(),
                context,
                conversation: ctx.conversation(),
            });
        }
        let response = node.payload.get_value("content").cloned().unwrap_or(Value::String(node.id.clone()));
        Ok(Some(response))
    }
}
