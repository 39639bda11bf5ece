mod action;
mod condition;
mod edge;
mod graph;
mod node;

pub use action::{ActionNode, Directive, Step};
pub use condition::{Condition, ConditionParams, ConditionRegistry, ConditionScope, Constant, ContextValue, FnCondition, NodeExists, ResponseMatches, Subject};
pub use edge::{Edge, EdgeId};
pub use graph::Graph;
pub use node::{AGENT_GRAPH_KEY, Node, NodeId, NodeKind};
