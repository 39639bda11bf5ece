//! Workflow graph.
//!
//! Wraps a petgraph `DiGraph` with an id index. The graph is built up front
//! and only read while an executor runs it, so it carries no lock.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use petgraph::{
    Direction,
    graph::{DiGraph, NodeIndex},
    visit::EdgeRef,
};

use crate::{
    MailflowError, Result,
    graph::{
        ActionNode, Condition, ConditionRegistry, Step,
        edge::{Edge, EdgeId},
        node::{Node, NodeId, NodeKind},
    },
    model::GraphModel,
    utils,
};

#[derive(Clone, Default)]
pub struct Graph {
    graph: DiGraph<Node, Edge>,
    index: HashMap<NodeId, NodeIndex>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output a human-readable representation of the graph
    pub fn schema(&self) -> String {
        let mut lines = Vec::new();

        lines.push("=== Graph ===".to_string());
        lines.push(format!("Nodes: {}, Edges: {}", self.graph.node_count(), self.graph.edge_count()));
        lines.push(String::new());

        lines.push("--- Nodes ---".to_string());
        for idx in self.graph.node_indices() {
            let node = &self.graph[idx];
            lines.push(format!("[{}] {} (kind: {})", node.id, node.title, node.kind.as_ref()));
        }
        lines.push(String::new());

        lines.push("--- Edges ---".to_string());
        for idx in self.graph.edge_indices() {
            let edge = &self.graph[idx];
            let label = match (&edge.condition, edge.bundle) {
                (_, true) => "bundle".to_string(),
                (Some(cond), false) => format!("if {}", cond.kind()),
                (None, false) => "next".to_string(),
            };
            lines.push(format!("{} --[{}]--> {} (id: {})", edge.head, label, edge.tail, edge.id));
        }
        lines.push(String::new());

        lines.push("--- Graph Structure ---".to_string());
        for idx in self.graph.node_indices() {
            let node = &self.graph[idx];
            let outgoing: Vec<String> = self.sorted_edges(idx, Direction::Outgoing).iter().map(|e| e.tail.clone()).collect();

            if outgoing.is_empty() {
                lines.push(format!("{} -> (end)", node.id));
            } else {
                lines.push(format!("{} -> {}", node.id, outgoing.join(", ")));
            }
        }

        lines.join("\n")
    }

    /// add node to graph
    pub fn add_node(
        &mut self,
        node: Node,
    ) -> Result<NodeIndex> {
        if self.index.contains_key(&node.id) {
            return Err(MailflowError::Structure(format!("node {} already exists", node.id)));
        }
        let nid = node.id.clone();
        let idx = self.graph.add_node(node);
        self.index.insert(nid, idx);
        Ok(idx)
    }

    /// Connects `head` to `tail`.
    ///
    /// Edges into tool or directive nodes are always bundle edges; those
    /// nodes can never be the head of an edge.
    pub fn relate(
        &mut self,
        head: &str,
        tail: &str,
        condition: Option<Arc<dyn Condition>>,
        bundle: bool,
    ) -> Result<EdgeId> {
        let edge = Edge::new(utils::shortid(), head, tail).with_condition(condition).bundled(bundle);
        self.insert_edge(edge)
    }

    /// Inserts a fully described edge, keeping its id.
    pub fn insert_edge(
        &mut self,
        mut edge: Edge,
    ) -> Result<EdgeId> {
        let head_idx = self.index_of(&edge.head)?;
        let tail_idx = self.index_of(&edge.tail)?;

        if self.graph[head_idx].kind.is_bundle_target() {
            return Err(MailflowError::Structure(format!(
                "{} node {} cannot be the head of an edge",
                self.graph[head_idx].kind, edge.head
            )));
        }
        if self.graph.find_edge(head_idx, tail_idx).is_some() {
            return Err(MailflowError::DuplicateEdge {
                head: edge.head,
                tail: edge.tail,
            });
        }
        if self.edge(&edge.id).is_some() {
            return Err(MailflowError::Structure(format!("edge {} already exists", edge.id)));
        }
        if self.graph[tail_idx].kind.is_bundle_target() {
            edge.bundle = true;
        }

        let id = edge.id.clone();
        self.graph.add_edge(head_idx, tail_idx, edge);
        Ok(id)
    }

    /// Entry points: nodes with no incoming non-bundle edge. Bundle targets
    /// are never heads.
    pub fn heads(&self) -> Vec<NodeId> {
        self.graph
            .node_indices()
            .filter(|idx| !self.graph[*idx].kind.is_bundle_target())
            .filter(|idx| self.graph.edges_directed(*idx, Direction::Incoming).all(|e| e.weight().bundle))
            .map(|idx| self.graph[idx].id.clone())
            .collect()
    }

    /// Outgoing edges of `nid`, in insertion order.
    pub fn outgoing(
        &self,
        nid: &str,
    ) -> Result<Vec<&Edge>> {
        let idx = self.index_of(nid)?;
        Ok(self.sorted_edges(idx, Direction::Outgoing))
    }

    pub fn is_acyclic(&self) -> bool {
        petgraph::algo::toposort(&self.graph, None).is_ok()
    }

    /// Fails with a structure error when the graph cannot be run.
    pub fn validate(&self) -> Result<()> {
        match petgraph::algo::toposort(&self.graph, None) {
            Ok(_) => Ok(()),
            Err(cycle) => Err(MailflowError::Structure(format!("graph is not acyclic: cycle through node {}", self.graph[cycle.node_id()].id))),
        }
    }

    pub fn node_exists(
        &self,
        nid: &str,
    ) -> bool {
        self.index.contains_key(nid)
    }

    /// get node by id
    pub fn node(
        &self,
        nid: &str,
    ) -> Option<&Node> {
        self.index.get(nid).map(|idx| &self.graph[*idx])
    }

    /// get edge by id
    pub fn edge(
        &self,
        id: &str,
    ) -> Option<&Edge> {
        self.graph.edge_indices().find(|idx| self.graph[*idx].id == id).map(|idx| &self.graph[idx])
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Resolves `nid` into the step that runs it: the bare node, or an
    /// [`ActionNode`] when bundle edges leave it.
    pub fn resolve(
        &self,
        nid: &str,
    ) -> Result<Step> {
        let idx = self.index_of(nid)?;
        let node = self.graph[idx].clone();

        let bundled: VecDeque<Node> = self
            .sorted_edges(idx, Direction::Outgoing)
            .into_iter()
            .filter(|edge| edge.bundle)
            .filter_map(|edge| self.node(&edge.tail).cloned())
            .collect();

        if bundled.is_empty() {
            return Ok(Step::Node(node));
        }
        Ok(Step::Action(ActionNode::from_bundle(node, bundled)?))
    }

    /// Rebuilds a graph from its serialized model.
    pub fn from_model(
        model: &GraphModel,
        registry: &ConditionRegistry,
    ) -> Result<Self> {
        let mut graph = Graph::new();

        for node in model.nodes.iter() {
            let kind: NodeKind = node.kind.parse().map_err(|_| MailflowError::Registry(format!("unknown node kind '{}' for node {}", node.kind, node.id)))?;
            let payload = node.payload.clone().into();
            graph.add_node(Node::new(node.id.clone(), kind, payload).titled(node.title.clone()))?;
        }
        for edge in model.edges.iter() {
            let condition = match &edge.condition {
                Some(desc) => Some(registry.build(desc).map_err(|e| MailflowError::condition(&edge.head, &edge.tail, e))?),
                None => None,
            };
            let id = edge.id.clone().unwrap_or_else(utils::shortid);
            graph.insert_edge(Edge::new(id, edge.head.clone(), edge.tail.clone()).with_condition(condition).bundled(edge.bundle))?;
        }
        Ok(graph)
    }

    fn index_of(
        &self,
        nid: &str,
    ) -> Result<NodeIndex> {
        self.index.get(nid).copied().ok_or(MailflowError::Structure(format!("node {} not found", nid)))
    }

    fn sorted_edges(
        &self,
        idx: NodeIndex,
        direction: Direction,
    ) -> Vec<&Edge> {
        let mut edges: Vec<_> = self.graph.edges_directed(idx, direction).collect();
        edges.sort_by_key(|e| e.id().index());
        edges.into_iter().map(|e| e.weight()).collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{common::Vars, graph::Constant};

    fn linear() -> Graph {
        let mut graph = Graph::new();
        graph.add_node(Node::system("S", "you are helpful")).unwrap();
        graph.add_node(Node::instruction("I", "summarize")).unwrap();
        graph.relate("S", "I", None, false).unwrap();
        graph
    }

    #[test]
    fn test_heads_and_outgoing() {
        let graph = linear();
        assert_eq!(graph.heads(), vec!["S".to_string()]);
        let out = graph.outgoing("S").unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].tail, "I");
        assert!(graph.outgoing("I").unwrap().is_empty());
        assert!(graph.outgoing("missing").is_err());
    }

    #[test]
    fn test_relate_missing_node() {
        let mut graph = linear();
        let err = graph.relate("S", "X", None, false).unwrap_err();
        assert!(matches!(err, MailflowError::Structure(_)));
    }

    #[test]
    fn test_relate_duplicate_pair() {
        let mut graph = linear();
        let err = graph.relate("S", "I", Some(Constant::always()), false).unwrap_err();
        assert_eq!(
            err,
            MailflowError::DuplicateEdge {
                head: "S".to_string(),
                tail: "I".to_string(),
            }
        );
        // the reverse direction is a different pair
        assert!(graph.relate("I", "S", None, false).is_ok());
    }

    #[test]
    fn test_cycle_detection() {
        let mut graph = linear();
        assert!(graph.is_acyclic());
        assert!(graph.validate().is_ok());

        graph.relate("I", "S", None, false).unwrap();
        assert!(!graph.is_acyclic());
        assert!(matches!(graph.validate(), Err(MailflowError::Structure(_))));
    }

    #[test]
    fn test_tool_edges_are_bundles() {
        let mut graph = linear();
        graph.add_node(Node::tool("T", "search")).unwrap();
        let id = graph.relate("I", "T", None, false).unwrap();
        assert!(graph.edge(&id).unwrap().bundle);

        // tools never start an edge and are never heads
        let err = graph.relate("T", "S", None, false).unwrap_err();
        assert!(matches!(err, MailflowError::Structure(_)));
        assert_eq!(graph.heads(), vec!["S".to_string()]);
    }

    #[test]
    fn test_outgoing_keeps_insertion_order() {
        let mut graph = Graph::new();
        graph.add_node(Node::instruction("N", "fan")).unwrap();
        for id in ["A", "B", "C"] {
            graph.add_node(Node::instruction(id, id)).unwrap();
            graph.relate("N", id, None, false).unwrap();
        }
        let tails: Vec<_> = graph.outgoing("N").unwrap().iter().map(|e| e.tail.clone()).collect();
        assert_eq!(tails, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_resolve_bundles_into_action_node() {
        let mut graph = linear();
        graph.add_node(Node::tool("T1", "search")).unwrap();
        graph.add_node(Node::tool("T2", "calc")).unwrap();
        graph.add_node(Node::directive("D", "react", Vars::new())).unwrap();
        graph.relate("I", "T1", None, true).unwrap();
        graph.relate("I", "D", None, true).unwrap();
        graph.relate("I", "T2", None, true).unwrap();

        let first = graph.resolve("I").unwrap();
        let second = graph.resolve("I").unwrap();
        assert_eq!(first, second);

        let action = first.as_action().unwrap();
        assert_eq!(action.instruction.id, "I");
        assert_eq!(action.directive.as_ref().unwrap().action, "react");
        assert_eq!(action.tool_ids(), vec!["T1", "T2"]);

        assert_eq!(graph.resolve("S").unwrap(), Step::Node(graph.node("S").unwrap().clone()));
    }

    #[test]
    fn test_resolve_rejects_bundled_instruction() {
        let mut graph = linear();
        graph.add_node(Node::instruction("X", "not a tool")).unwrap();
        graph.relate("I", "X", None, true).unwrap();
        let err = graph.resolve("I").unwrap_err();
        assert!(matches!(err, MailflowError::InvalidBundle { node, .. } if node == "X"));
    }

    #[test]
    fn test_from_model() {
        let model = GraphModel::from_json(
            &json!({
                "id": "g",
                "nodes": [
                    {"id": "S", "kind": "system", "payload": {"content": "sys"}},
                    {"id": "I", "kind": "instruction", "title": "ask"},
                    {"id": "T", "kind": "tool", "payload": {"name": "search"}}
                ],
                "edges": [
                    {"head": "S", "tail": "I", "condition": {"kind": "constant", "params": {"value": true}}},
                    {"id": "bundle-1", "head": "I", "tail": "T"}
                ]
            })
            .to_string(),
        )
        .unwrap();

        let graph = Graph::from_model(&model, &ConditionRegistry::default()).unwrap();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.node("I").unwrap().title, "ask");
        assert!(graph.edge("bundle-1").unwrap().bundle);
        assert_eq!(graph.outgoing("S").unwrap()[0].condition.as_ref().unwrap().kind(), "constant");
        assert!(graph.schema().contains("S --[if constant]--> I"));
    }

    #[test]
    fn test_from_model_unknown_kinds() {
        let model = GraphModel::from_json(r#"{"id": "g", "nodes": [{"id": "X", "kind": "spreadsheet"}]}"#).unwrap();
        let err = Graph::from_model(&model, &ConditionRegistry::default()).err().unwrap();
        assert!(matches!(err, MailflowError::Registry(_)));

        let model = GraphModel::from_json(
            r#"{"id": "g",
                "nodes": [{"id": "A", "kind": "instruction"}, {"id": "B", "kind": "instruction"}],
                "edges": [{"head": "A", "tail": "B", "condition": {"kind": "lambda"}}]}"#,
        )
        .unwrap();
        let err = Graph::from_model(&model, &ConditionRegistry::default()).err().unwrap();
        assert!(matches!(err, MailflowError::Condition { ref head, .. } if head == "A"));
    }
}
