//! Bundle resolution.
//!
//! Tools and directives never run on their own. When a node with outgoing
//! bundle edges is reached, its bundle targets are merged into an
//! [`ActionNode`] and that composite travels downstream instead of the bare
//! node.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::{
    MailflowError, Result,
    common::Vars,
    graph::{Node, NodeId, NodeKind},
};

/// Action selection carried by a directive node.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Directive {
    pub action: String,
    #[serde(default)]
    pub action_kwargs: Vars,
}

/// An instruction node merged with the capabilities bundled onto it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ActionNode {
    pub instruction: Node,
    pub directive: Option<Directive>,
    pub tools: Vec<Node>,
}

impl ActionNode {
    pub fn new(instruction: Node) -> Self {
        Self {
            instruction,
            directive: None,
            tools: Vec::new(),
        }
    }

    /// Drains `bundled` in discovery order. The first directive wins; every
    /// tool is appended.
    pub fn from_bundle(
        instruction: Node,
        mut bundled: VecDeque<Node>,
    ) -> Result<Self> {
        let mut action = Self::new(instruction);
        while let Some(node) = bundled.pop_front() {
            match node.kind {
                NodeKind::Directive => {
                    if action.directive.is_none() {
                        action.directive = Some(node.as_directive()?);
                    } else {
                        tracing::debug!(node = %node.id, instruction = %action.instruction.id, "extra directive ignored");
                    }
                }
                NodeKind::Tool => action.tools.push(node),
                _ => {
                    return Err(MailflowError::InvalidBundle {
                        node: node.id,
                        kind: node.kind.to_string(),
                    });
                }
            }
        }
        Ok(action)
    }

    pub fn tool_ids(&self) -> Vec<&NodeId> {
        self.tools.iter().map(|t| &t.id).collect()
    }
}

/// Unit of work handed from the graph to a branch.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", content = "node", rename_all = "snake_case")]
pub enum Step {
    Node(Node),
    Action(ActionNode),
}

impl Step {
    /// Id of the graph node this step was reached at.
    pub fn id(&self) -> &NodeId {
        &self.node().id
    }

    /// The graph node this step was reached at.
    pub fn node(&self) -> &Node {
        match self {
            Step::Node(node) => node,
            Step::Action(action) => &action.instruction,
        }
    }

    pub fn as_action(&self) -> Option<&ActionNode> {
        match self {
            Step::Action(action) => Some(action),
            Step::Node(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_directive_wins_and_tools_keep_order() {
        let bundled = VecDeque::from(vec![
            Node::tool("t1", "search"),
            Node::directive("d1", "react", Vars::new()),
            Node::tool("t2", "calc"),
            Node::directive("d2", "chat", Vars::new()),
        ]);
        let action = ActionNode::from_bundle(Node::instruction("i", "do it"), bundled).unwrap();
        assert_eq!(action.directive.unwrap().action, "react");
        assert_eq!(action.tools.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), vec!["t1", "t2"]);
    }

    #[test]
    fn test_unmergeable_kind() {
        let bundled = VecDeque::from(vec![Node::tool("t1", "search"), Node::system("s", "sys")]);
        let err = ActionNode::from_bundle(Node::instruction("i", "do it"), bundled).unwrap_err();
        assert_eq!(
            err,
            MailflowError::InvalidBundle {
                node: "s".to_string(),
                kind: "system".to_string(),
            }
        );
    }

    #[test]
    fn test_step_id_is_origin_node() {
        let action = ActionNode::new(Node::instruction("i", "do it"));
        let step = Step::Action(action);
        assert_eq!(step.id(), "i");
        assert!(step.as_action().is_some());
        assert!(Step::Node(Node::system("s", "sys")).as_action().is_none());
    }
}
