use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    ShareLock,
    common::{MemCache, Vars, read, write},
    graph::NodeId,
};

const OUTPUT_CAPACITY: usize = 1024;

/// How a forked branch sees the context of the branch it forked from.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ContextSharing {
    /// the fork starts from a deep copy
    #[default]
    Isolated,
    /// both branches read and write one lock-guarded state
    Shared,
}

#[derive(Debug, Default, Clone)]
struct BranchState {
    pending: Option<Value>,
    log: Vec<Value>,
}

/// Conversation a branch inherited from the branch it forked from.
#[derive(Clone)]
enum History {
    /// frozen at fork time
    Snapshot(Arc<Vec<Value>>),
    /// follows the origin branch as it keeps answering
    Live(Box<Context>),
}

impl Default for History {
    fn default() -> Self {
        History::Snapshot(Arc::new(Vec::new()))
    }
}

impl History {
    fn values(&self) -> Vec<Value> {
        match self {
            History::Snapshot(values) => values.to_vec(),
            History::Live(origin) => origin.conversation(),
        }
    }

    fn last(&self) -> Option<Value> {
        match self {
            History::Snapshot(values) => values.last().cloned(),
            History::Live(origin) => origin.last_response(),
        }
    }
}

/// Mutable state of one branch.
///
/// Cloning yields a handle onto the same branch; use [`Context::fork`] to
/// derive a new branch. `responses` holds only what this branch answered;
/// the conversation it inherited on fork is kept apart in `history`.
#[derive(Clone)]
pub struct Context {
    state: ShareLock<BranchState>,
    history: History,
    responses: ShareLock<Vec<Value>>,
    outputs: Arc<MemCache<NodeId, Vars>>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(BranchState::default())),
            history: History::default(),
            responses: Arc::new(RwLock::new(Vec::new())),
            outputs: Arc::new(MemCache::new(OUTPUT_CAPACITY)),
        }
    }

    /// Context whose first processed node receives `context`.
    pub fn with_context(context: Value) -> Self {
        let ctx = Self::new();
        ctx.set_pending(context);
        ctx
    }

    /// Replaces the context handed to the next processed node. `null` clears it.
    pub fn set_pending(
        &self,
        context: Value,
    ) {
        write(&self.state).pending = match context {
            Value::Null => None,
            other => Some(other),
        };
    }

    /// Consumes the pending context and appends it to the log.
    pub fn take_pending(&self) -> Option<Value> {
        let mut state = write(&self.state);
        let pending = state.pending.take();
        if let Some(value) = &pending {
            state.log.push(value.clone());
        }
        pending
    }

    pub fn pending(&self) -> Option<Value> {
        read(&self.state).pending.clone()
    }

    /// Pending context, or the last one consumed.
    pub fn latest_context(&self) -> Option<Value> {
        let state = read(&self.state);
        state.pending.clone().or_else(|| state.log.last().cloned())
    }

    pub fn log(&self) -> Vec<Value> {
        read(&self.state).log.clone()
    }

    /// Responses produced by this branch itself.
    pub fn responses(&self) -> Vec<Value> {
        read(&self.responses).clone()
    }

    /// Conversation inherited from the origin branch on fork.
    pub fn history(&self) -> Vec<Value> {
        self.history.values()
    }

    /// Inherited conversation followed by this branch's own responses.
    pub fn conversation(&self) -> Vec<Value> {
        let mut conversation = self.history.values();
        conversation.extend(self.responses());
        conversation
    }

    pub fn push_response(
        &self,
        response: Value,
    ) {
        write(&self.responses).push(response);
    }

    /// Last entry of the conversation, own or inherited.
    pub fn last_response(&self) -> Option<Value> {
        let own = read(&self.responses).last().cloned();
        own.or_else(|| self.history.last())
    }

    pub fn add_output(
        &self,
        nid: NodeId,
        outputs: Vars,
    ) {
        self.outputs.set(nid, outputs);
    }

    pub fn output(
        &self,
        nid: &NodeId,
    ) -> Option<Vars> {
        self.outputs.get(nid)
    }

    pub fn has_output(
        &self,
        nid: &NodeId,
    ) -> bool {
        self.outputs.contains(nid)
    }

    /// Context for a branch forked from this one. The fork inherits this
    /// branch's conversation as history and starts without responses of its
    /// own.
    pub fn fork(
        &self,
        sharing: ContextSharing,
    ) -> Self {
        match sharing {
            ContextSharing::Isolated => Self {
                state: Arc::new(RwLock::new(read(&self.state).clone())),
                history: History::Snapshot(Arc::new(self.conversation())),
                responses: Arc::new(RwLock::new(Vec::new())),
                outputs: Arc::new(self.outputs.snapshot()),
            },
            ContextSharing::Shared => Self {
                state: self.state.clone(),
                history: History::Live(Box::new(self.clone())),
                responses: Arc::new(RwLock::new(Vec::new())),
                outputs: self.outputs.clone(),
            },
        }
    }

    pub fn is_shared_with(
        &self,
        other: &Context,
    ) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}
