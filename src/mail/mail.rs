//! Mail and its typed payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    graph::{Edge, EdgeId, NodeId, Step},
    utils,
};

/// Id of an actor registered with a mail manager.
pub type ActorId = String;

/// Token pairing a condition check with its verdict.
pub type CorrelationId = String;

/// Routing category, derived from the payload variant.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, strum::AsRefStr, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MailCategory {
    Start,
    End,
    Node,
    NodeId,
    NodeList,
    Condition,
}

/// Body of a `start` mail.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StartRequest {
    /// initial context of the branch that is started
    pub context: Value,
    /// graph executor the branch must report to
    pub graph_id: ActorId,
}

/// Executable-scope condition shipped to the branch that owns the step.
#[derive(Debug, Clone)]
pub struct ConditionCheck {
    pub correlation: CorrelationId,
    pub edge: Edge,
}

/// Answer to a [`ConditionCheck`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConditionVerdict {
    pub correlation: CorrelationId,
    pub edge_id: EdgeId,
    pub check_result: bool,
}

#[derive(Debug, Clone)]
pub enum Payload {
    Start(StartRequest),
    End,
    Node(Step),
    NodeId(NodeId),
    NodeList(Vec<Step>),
    ConditionCheck(ConditionCheck),
    ConditionVerdict(ConditionVerdict),
}

impl Payload {
    pub fn category(&self) -> MailCategory {
        match self {
            Payload::Start(_) => MailCategory::Start,
            Payload::End => MailCategory::End,
            Payload::Node(_) => MailCategory::Node,
            Payload::NodeId(_) => MailCategory::NodeId,
            Payload::NodeList(_) => MailCategory::NodeList,
            Payload::ConditionCheck(_) | Payload::ConditionVerdict(_) => MailCategory::Condition,
        }
    }

    /// Wraps successor steps the way the graph replies with them:
    /// none is `end`, one is `node`, more is `node_list`.
    pub fn from_steps(mut steps: Vec<Step>) -> Self {
        match steps.len() {
            0 => Payload::End,
            1 => Payload::Node(steps.remove(0)),
            _ => Payload::NodeList(steps),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Package {
    /// branch that must receive the continuation
    pub request_source: ActorId,
    pub payload: Payload,
}

#[derive(Debug, Clone)]
pub struct Mail {
    pub id: String,
    pub sender: ActorId,
    pub recipient: ActorId,
    pub package: Package,
    /// creation time in milliseconds
    pub timestamp: i64,
}

impl Mail {
    pub fn new(
        sender: impl Into<ActorId>,
        recipient: impl Into<ActorId>,
        request_source: impl Into<ActorId>,
        payload: Payload,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender: sender.into(),
            recipient: recipient.into(),
            package: Package {
                request_source: request_source.into(),
                payload,
            },
            timestamp: utils::time::time_millis(),
        }
    }

    pub fn category(&self) -> MailCategory {
        self.package.payload.category()
    }

    pub fn request_source(&self) -> &ActorId {
        &self.package.request_source
    }

    pub fn payload(&self) -> &Payload {
        &self.package.payload
    }

    /// Same package under a new envelope.
    pub fn readdress(
        self,
        sender: &ActorId,
        recipient: &ActorId,
    ) -> Self {
        let Package {
            request_source,
            payload,
        } = self.package;
        Mail::new(sender.clone(), recipient.clone(), request_source, payload)
    }

    /// The verdict carried by a `condition` reply, if this is one.
    pub fn as_verdict(&self) -> Option<&ConditionVerdict> {
        match &self.package.payload {
            Payload::ConditionVerdict(verdict) => Some(verdict),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;

    #[test]
    fn test_category_follows_payload() {
        let mail = Mail::new("a", "b", "a", Payload::NodeId("n".to_string()));
        assert_eq!(mail.category(), MailCategory::NodeId);
        assert_eq!(mail.category().as_ref(), "node_id");

        let verdict = Payload::ConditionVerdict(ConditionVerdict {
            correlation: "c".to_string(),
            edge_id: "e".to_string(),
            check_result: true,
        });
        assert_eq!(verdict.category(), MailCategory::Condition);
    }

    #[test]
    fn test_from_steps() {
        assert_eq!(Payload::from_steps(vec![]).category(), MailCategory::End);
        let one = Payload::from_steps(vec![Step::Node(Node::instruction("a", "x"))]);
        assert!(matches!(one, Payload::Node(step) if step.id() == "a"));
        let many = Payload::from_steps(vec![Step::Node(Node::instruction("a", "x")), Step::Node(Node::instruction("b", "y"))]);
        assert_eq!(many.category(), MailCategory::NodeList);
    }

    #[test]
    fn test_readdress_keeps_package() {
        let mail = Mail::new("graph", "forker", "branch-1", Payload::End);
        let moved = mail.clone().readdress(&"transfer".to_string(), &"branch-1".to_string());
        assert_eq!(moved.sender, "transfer");
        assert_eq!(moved.recipient, "branch-1");
        assert_eq!(moved.request_source(), "branch-1");
        assert_ne!(moved.id, mail.id);
    }
}
