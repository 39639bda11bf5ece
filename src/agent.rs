//! Agent: one graph executor and one executable actor under a single driving
//! loop.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::{
    AgentBuilder, MailflowError, Result,
    common::Queue,
    executor::{Executor, GraphExecutor},
    graph::Graph,
    mail::{Actor, ActorId, Mail, MailManager, Payload, StartRequest},
    model::GraphModel,
    runtime::Services,
    utils,
};

/// Turns the collected responses into the agent's result.
pub type OutputParser = Arc<dyn Fn(Vec<Value>) -> Result<Value> + Send + Sync>;

pub struct Agent {
    id: ActorId,
    graph: Arc<GraphExecutor>,
    executable: Arc<dyn Executor>,
    manager: MailManager,
    services: Services,
    output_parser: Option<OutputParser>,
}

impl Agent {
    pub fn new(
        graph: GraphExecutor,
        executable: Arc<dyn Executor>,
        services: Services,
        output_parser: Option<OutputParser>,
    ) -> Self {
        let manager = MailManager::new().with_journal(services.config.journal_capacity);
        let graph = Arc::new(graph);
        manager.add_mailbox(graph.id(), &graph.mailbox());
        manager.add_mailbox(executable.id(), &executable.mailbox());

        Self {
            id: format!("agent-{}", utils::longid()),
            graph,
            executable,
            manager,
            services,
            output_parser,
        }
    }

    pub fn id(&self) -> &ActorId {
        &self.id
    }

    pub fn graph(&self) -> &Graph {
        self.graph.graph()
    }

    pub fn executable(&self) -> Arc<dyn Executor> {
        self.executable.clone()
    }

    /// Copies of the mail routed between the graph and the executable, when
    /// `journal_capacity` is set.
    pub fn journal(&self) -> Option<Arc<Queue<Mail>>> {
        self.manager.journal()
    }

    /// Runs the workflow from `context` and returns the parsed result, or the
    /// collected responses as an array when no parser is set.
    pub async fn execute(
        &self,
        context: Value,
    ) -> Result<Value> {
        let responses = self.run(context).await?;
        match &self.output_parser {
            Some(parser) => parser(responses),
            None => Ok(Value::Array(responses)),
        }
    }

    /// Runs the workflow from `context` and returns the collected responses.
    pub async fn run(
        &self,
        context: Value,
    ) -> Result<Vec<Value>> {
        if self.graph.is_halted() || self.executable.is_halted() {
            return Err(MailflowError::Process(format!("agent {} has already run", self.id)));
        }
        self.graph.validate()?;
        self.executable.validate()?;

        let request = StartRequest {
            context,
            graph_id: self.graph.id().clone(),
        };
        self.manager.create_mail(&self.id, self.executable.id(), &self.id, Payload::Start(request))?;
        tracing::debug!(agent = %self.id, graph = %self.graph.id(), executable = %self.executable.id(), "agent started");

        let started = utils::time::time_millis();
        let cadence = &self.services.config.tick;
        let until = [self.graph.halt_signal(), self.executable.halt_signal()];
        tokio::try_join!(self.manager.execute(cadence, &until), self.graph.execute(cadence), self.executable.execute(cadence))?;

        tracing::debug!(agent = %self.id, elapsed_ms = utils::time::millis_since(started), "agent finished");
        Ok(self.executable.responses())
    }
}

/// Runs the workflow of an agent node on a fresh agent sharing `services`.
///
/// Boxed so that an agent node nested in a branch does not make the branch's
/// future recursive.
pub fn run_nested(
    model: GraphModel,
    context: Value,
    services: Services,
) -> BoxFuture<'static, Result<Vec<Value>>> {
    Box::pin(async move {
        let graph = Graph::from_model(&model, &services.registry)?;
        let agent = AgentBuilder::new().services(services).build(graph)?;
        tracing::trace!(agent = %agent.id(), graph = %model.id, "nested agent");
        agent.run(context).await
    })
}
