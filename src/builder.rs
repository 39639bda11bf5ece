use std::sync::Arc;

use serde_json::Value;

use crate::{
    Agent, Config, OutputParser, Result,
    executor::{BranchExecutor, BranchForkingExecutor, Executor, GraphExecutor},
    graph::{ConditionRegistry, Graph},
    model::GraphModel,
    runtime::{NodeProcessor, RecordingProcessor, Services},
};

#[derive(Default)]
pub struct AgentBuilder {
    config: Option<Config>,
    processor: Option<Arc<dyn NodeProcessor>>,
    registry: Option<ConditionRegistry>,
    services: Option<Services>,
    single_branch: bool,
    output_parser: Option<OutputParser>,
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(
        mut self,
        config: Config,
    ) -> Self {
        self.config = Some(config);
        self
    }

    pub fn processor(
        mut self,
        processor: Arc<dyn NodeProcessor>,
    ) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn registry(
        mut self,
        registry: ConditionRegistry,
    ) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Reuses already assembled collaborators; overrides `config`,
    /// `processor` and `registry`.
    pub fn services(
        mut self,
        services: Services,
    ) -> Self {
        self.services = Some(services);
        self
    }

    /// Runs the workflow on one branch actor instead of a forking executor.
    /// Fan-out then fails with an unroutable `node_list`.
    pub fn single_branch(
        mut self,
        single_branch: bool,
    ) -> Self {
        self.single_branch = single_branch;
        self
    }

    pub fn output_parser<F>(
        mut self,
        parser: F,
    ) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.output_parser = Some(Arc::new(parser));
        self
    }

    pub fn build(
        self,
        graph: Graph,
    ) -> Result<Agent> {
        let services = match self.services {
            Some(services) => services,
            None => Services::new(
                self.processor.unwrap_or_else(|| Arc::new(RecordingProcessor::new())),
                Arc::new(self.registry.unwrap_or_default()),
                Arc::new(self.config.unwrap_or_default()),
            ),
        };

        let graph = GraphExecutor::new(graph, services.config.condition_timeout());
        let executable: Arc<dyn Executor> = if self.single_branch {
            Arc::new(BranchExecutor::new(services.clone()))
        } else {
            Arc::new(BranchForkingExecutor::new(services.clone()))
        };
        Ok(Agent::new(graph, executable, services, self.output_parser))
    }

    /// Builds the graph with the configured condition registry.
    pub fn build_from_model(
        self,
        model: &GraphModel,
    ) -> Result<Agent> {
        let graph = match (&self.services, &self.registry) {
            (Some(services), _) => Graph::from_model(model, &services.registry)?,
            (None, Some(registry)) => Graph::from_model(model, registry)?,
            (None, None) => Graph::from_model(model, &ConditionRegistry::default())?,
        };
        self.build(graph)
    }

    pub fn build_from_json(
        self,
        json: &str,
    ) -> Result<Agent> {
        let model = GraphModel::from_json(json)?;
        self.build_from_model(&model)
    }
}
