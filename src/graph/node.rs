use serde::{Deserialize, Serialize};

use crate::{MailflowError, Result, common::Vars, graph::Directive, model::GraphModel};

/// node id
pub type NodeId = String;

/// Payload key holding an agent node's nested graph.
pub const AGENT_GRAPH_KEY: &str = "graph";

/// What a node stands for. Only the bundling rules and agent nesting look at
/// it; everything else about the payload is opaque to the engine.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, strum::AsRefStr, strum::EnumString, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeKind {
    System,
    Instruction,
    /// Reference to a nested workflow run by its own graph executor.
    Agent,
    /// Tool capability; only reachable through bundle edges.
    Tool,
    /// Action selection; only reachable through bundle edges.
    Directive,
}

impl NodeKind {
    /// Kinds that can only be merged into an action node.
    pub fn is_bundle_target(&self) -> bool {
        matches!(self, NodeKind::Tool | NodeKind::Directive)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Node {
    /// node id
    pub id: NodeId,
    /// node kind
    pub kind: NodeKind,
    /// node title
    #[serde(default)]
    pub title: String,
    /// opaque content supplied by the payload producer
    #[serde(default)]
    pub payload: Vars,
}

impl Node {
    pub fn new(
        id: impl Into<NodeId>,
        kind: NodeKind,
        payload: Vars,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            title: String::new(),
            payload,
        }
    }

    pub fn system(
        id: impl Into<NodeId>,
        content: impl Serialize,
    ) -> Self {
        Self::new(id, NodeKind::System, Vars::new().with("content", content))
    }

    pub fn instruction(
        id: impl Into<NodeId>,
        content: impl Serialize,
    ) -> Self {
        Self::new(id, NodeKind::Instruction, Vars::new().with("content", content))
    }

    pub fn tool(
        id: impl Into<NodeId>,
        name: &str,
    ) -> Self {
        Self::new(id, NodeKind::Tool, Vars::new().with("name", name))
    }

    pub fn directive(
        id: impl Into<NodeId>,
        action: &str,
        action_kwargs: Vars,
    ) -> Self {
        Self::new(id, NodeKind::Directive, Vars::new().with("action", action).with("action_kwargs", action_kwargs))
    }

    /// Agent node wrapping a nested workflow.
    pub fn agent(
        id: impl Into<NodeId>,
        graph: &GraphModel,
    ) -> Self {
        Self::new(id, NodeKind::Agent, Vars::new().with(AGENT_GRAPH_KEY, graph))
    }

    pub fn titled(
        mut self,
        title: impl Into<String>,
    ) -> Self {
        self.title = title.into();
        self
    }

    /// Reads the action selection carried by a directive node.
    pub fn as_directive(&self) -> Result<Directive> {
        if self.kind != NodeKind::Directive {
            return Err(MailflowError::InvalidBundle {
                node: self.id.clone(),
                kind: self.kind.to_string(),
            });
        }
        let value: serde_json::Value = self.payload.clone().into();
        serde_json::from_value(value).map_err(|e| MailflowError::Convert(format!("invalid directive {}: {}", self.id, e)))
    }

    /// Reads the nested workflow carried by an agent node.
    pub fn nested_graph(&self) -> Result<GraphModel> {
        if self.kind != NodeKind::Agent {
            return Err(MailflowError::Structure(format!("node {} is not an agent node", self.id)));
        }
        self.payload
            .get::<GraphModel>(AGENT_GRAPH_KEY)
            .ok_or(MailflowError::Structure(format!("agent node {} carries no '{}' payload", self.id, AGENT_GRAPH_KEY)))
    }
}
