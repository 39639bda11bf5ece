//! Error types for Mailflow.
//!
//! All errors in Mailflow are represented by the `MailflowError` enum.
//! Every failure raised while a mail is interpreted aborts the enclosing
//! `forward()` call and reaches whoever drives `execute()`.

use std::{io::ErrorKind, string::FromUtf8Error};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ActorId, EdgeId, NodeId, mail::MailCategory};

/// Unified error type for all Mailflow operations.
#[derive(Deserialize, Serialize, Error, Debug, Clone, PartialEq)]
pub enum MailflowError {
    /// The graph is cyclic, or a referenced node/edge is missing.
    #[error("structure error: {0}")]
    Structure(String),

    /// A mail category the receiving actor does not interpret.
    #[error("actor {actor} cannot route mail of category '{}'", category.as_ref())]
    UnroutableMail {
        actor: ActorId,
        category: MailCategory,
    },

    /// A bundle target whose kind cannot be merged into an action node.
    #[error("node {node} of kind '{kind}' cannot be bundled")]
    InvalidBundle {
        node: NodeId,
        kind: String,
    },

    /// Two edges for the same ordered pair of nodes.
    #[error("an edge from {head} to {tail} already exists")]
    DuplicateEdge {
        head: NodeId,
        tail: NodeId,
    },

    /// The edge predicate itself failed.
    #[error("condition on edge {head} -> {tail} failed: {message}")]
    Condition {
        head: NodeId,
        tail: NodeId,
        message: String,
    },

    /// No reply to an executable-scope condition within the configured timeout.
    #[error("condition on edge {edge} ({head} -> {tail}) was not answered within {timeout_ms}ms")]
    ConditionTimeout {
        edge: EdgeId,
        head: NodeId,
        tail: NodeId,
        timeout_ms: u64,
    },

    /// Routing errors: unknown sender or recipient, dropped mailbox.
    #[error("{0}")]
    Mail(String),

    /// Unknown kind tag while rebuilding a graph from its model.
    #[error("{0}")]
    Registry(String),

    /// The node processor failed on a step.
    #[error("{0}")]
    Process(String),

    /// Configuration parsing or validation errors.
    #[error("{0}")]
    Config(String),

    /// Data conversion errors (JSON, TOML, schema validation).
    #[error("{0}")]
    Convert(String),

    /// I/O operation errors.
    #[error("{0}")]
    IoError(String),
}

impl MailflowError {
    /// Wraps a predicate failure with the edge it guards.
    pub fn condition(
        head: &NodeId,
        tail: &NodeId,
        message: impl ToString,
    ) -> Self {
        MailflowError::Condition {
            head: head.clone(),
            tail: tail.clone(),
            message: message.to_string(),
        }
    }
}

impl From<MailflowError> for String {
    fn from(val: MailflowError) -> Self {
        val.to_string()
    }
}

impl From<std::io::Error> for MailflowError {
    fn from(error: std::io::Error) -> Self {
        MailflowError::IoError(error.to_string())
    }
}

impl From<MailflowError> for std::io::Error {
    fn from(val: MailflowError) -> Self {
        #[allow(clippy::io_other_error)]
        std::io::Error::new(ErrorKind::Other, val.to_string())
    }
}

impl From<FromUtf8Error> for MailflowError {
    fn from(_: FromUtf8Error) -> Self {
        MailflowError::Convert("Error with utf-8 string convert".to_string())
    }
}

impl From<serde_json::Error> for MailflowError {
    fn from(error: serde_json::Error) -> Self {
        MailflowError::Convert(error.to_string())
    }
}

impl From<toml::de::Error> for MailflowError {
    fn from(error: toml::de::Error) -> Self {
        MailflowError::Config(error.to_string())
    }
}

impl From<jsonschema::ValidationError<'_>> for MailflowError {
    fn from(error: jsonschema::ValidationError<'_>) -> Self {
        MailflowError::Convert(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unroutable_message_names_category() {
        let err = MailflowError::UnroutableMail {
            actor: "graph-1".to_string(),
            category: MailCategory::NodeList,
        };
        assert_eq!(err.to_string(), "actor graph-1 cannot route mail of category 'node_list'");
    }

    #[test]
    fn test_condition_wraps_edge_context() {
        let err = MailflowError::condition(&"a".to_string(), &"b".to_string(), "boom");
        assert_eq!(
            err,
            MailflowError::Condition {
                head: "a".to_string(),
                tail: "b".to_string(),
                message: "boom".to_string(),
            }
        );
        assert!(err.to_string().contains("a -> b"));
    }
}
