use serde::{Deserialize, Serialize};

/// Serialized condition: a registered kind plus its params.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionModel {
    pub kind: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeModel {
    /// generated when missing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub head: String,
    pub tail: String,
    #[serde(default)]
    pub bundle: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionModel>,
}
