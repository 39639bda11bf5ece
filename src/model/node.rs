use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeModel {
    pub id: String,
    /// one of `system`, `instruction`, `agent`, `tool`, `directive`
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}
