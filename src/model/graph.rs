use serde::{Deserialize, Serialize};

use crate::{
    MailflowError, Result,
    model::{EdgeModel, NodeModel},
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphModel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub nodes: Vec<NodeModel>,
    #[serde(default)]
    pub edges: Vec<EdgeModel>,
}

impl GraphModel {
    pub fn from_json(s: &str) -> Result<Self> {
        let graph = serde_json::from_str::<GraphModel>(s);
        match graph {
            Ok(v) => Ok(v),
            Err(e) => Err(MailflowError::Convert(format!("{}", e))),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
