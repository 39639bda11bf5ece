//! Graph edges.
//!
//! An edge is either sequential flow (optionally gated by a condition) or a
//! bundle edge attaching a tool/directive to the node it leaves from.

use std::{fmt, sync::Arc};

use crate::graph::{Condition, node::NodeId};

/// Unique identifier for an edge within a graph.
pub type EdgeId = String;

#[derive(Clone)]
pub struct Edge {
    /// Unique edge identifier.
    pub id: EdgeId,
    /// ID of the node the edge leaves from.
    pub head: NodeId,
    /// ID of the node the edge points to.
    pub tail: NodeId,
    /// Gate evaluated before the tail is followed.
    pub condition: Option<Arc<dyn Condition>>,
    /// Marks the tail as a capability merged into the head.
    pub bundle: bool,
}

impl Edge {
    pub fn new(
        id: impl Into<EdgeId>,
        head: impl Into<NodeId>,
        tail: impl Into<NodeId>,
    ) -> Self {
        Self {
            id: id.into(),
            head: head.into(),
            tail: tail.into(),
            condition: None,
            bundle: false,
        }
    }

    pub fn with_condition(
        mut self,
        condition: Option<Arc<dyn Condition>>,
    ) -> Self {
        self.condition = condition;
        self
    }

    pub fn bundled(
        mut self,
        bundle: bool,
    ) -> Self {
        self.bundle = bundle;
        self
    }
}

impl fmt::Debug for Edge {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Edge")
            .field("id", &self.id)
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("condition", &self.condition.as_ref().map(|c| c.kind().to_string()))
            .field("bundle", &self.bundle)
            .finish()
    }
}
