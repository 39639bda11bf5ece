use std::sync::Arc;

use crate::{Config, graph::ConditionRegistry, runtime::NodeProcessor};

/// Collaborators shared by every executor of one agent, nested agents included.
#[derive(Clone)]
pub struct Services {
    pub processor: Arc<dyn NodeProcessor>,
    pub registry: Arc<ConditionRegistry>,
    pub config: Arc<Config>,
}

impl Services {
    pub fn new(
        processor: Arc<dyn NodeProcessor>,
        registry: Arc<ConditionRegistry>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            processor,
            registry,
            config,
        }
    }
}
