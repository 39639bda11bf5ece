//! Branch executor: runs the steps of one branch.
//!
//! Steps go to the node processor, except agent nodes, whose nested graph is
//! run to completion by a nested agent. Executable-scope conditions are
//! judged against this branch's context.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    MailflowError, Result, ShareLock,
    agent::run_nested,
    common::{Shutdown, Vars, read, write},
    executor::Executor,
    graph::{NodeKind, Step, Subject},
    mail::{Actor, ActorId, ConditionCheck, ConditionVerdict, Mail, Mailbox, Payload, StartRequest},
    runtime::{Context, Services},
    utils,
};

pub struct BranchExecutor {
    id: ActorId,
    ctx: Context,
    mailbox: ShareLock<Mailbox>,
    halt: Arc<Shutdown>,
    services: Services,
}

impl BranchExecutor {
    pub fn new(services: Services) -> Self {
        Self::with_context(services, Context::new())
    }

    pub fn with_context(
        services: Services,
        ctx: Context,
    ) -> Self {
        Self {
            id: format!("branch-{}", utils::longid()),
            ctx,
            mailbox: Arc::new(RwLock::new(Mailbox::new())),
            halt: Arc::new(Shutdown::new()),
            services,
        }
    }

    /// Handle onto this branch's context.
    pub fn context(&self) -> Context {
        self.ctx.clone()
    }

    pub fn has_mail(&self) -> bool {
        read(&self.mailbox).has_pending_in()
    }

    async fn interpret(
        &self,
        mail: Mail,
    ) -> Result<()> {
        let category = mail.category();
        let sender = mail.sender;

        match mail.package.payload {
            Payload::Start(request) => self.start(request),
            Payload::Node(step) => {
                self.run_step(&step).await?;
                self.send(&sender, Payload::NodeId(step.id().clone()));
            }
            Payload::ConditionCheck(check) => {
                let verdict = self.judge(check)?;
                self.send(&sender, Payload::ConditionVerdict(verdict));
            }
            Payload::End => {
                tracing::debug!(branch = %self.id, "end received, halting");
                self.halt.shutdown();
                self.send(&sender, Payload::End);
            }
            Payload::NodeList(_) | Payload::NodeId(_) | Payload::ConditionVerdict(_) => {
                return Err(MailflowError::UnroutableMail {
                    actor: self.id.clone(),
                    category,
                });
            }
        }
        Ok(())
    }

    /// Adopts the initial context and asks the graph for its heads.
    fn start(
        &self,
        request: StartRequest,
    ) {
        self.ctx.set_pending(request.context.clone());
        let graph_id = request.graph_id.clone();
        self.send(&graph_id, Payload::Start(request));
    }

    async fn run_step(
        &self,
        step: &Step,
    ) -> Result<()> {
        let node = step.node();
        let context = self.ctx.take_pending();
        tracing::trace!(branch = %self.id, node = %node.id, kind = %node.kind, "process");

        if node.kind == NodeKind::Agent {
            let model = node.nested_graph()?;
            let results = run_nested(model, context.unwrap_or(Value::Null), self.services.clone()).await?;
            self.ctx.add_output(node.id.clone(), Vars::new().with("results", &results));
            for result in results.iter() {
                self.ctx.push_response(result.clone());
            }
            self.ctx.set_pending(Value::Array(results));
            return Ok(());
        }

        if let Some(response) = self.services.processor.process(&self.ctx, step, context).await? {
            self.ctx.add_output(node.id.clone(), Vars::from(response.clone()));
            self.ctx.push_response(response);
        }
        Ok(())
    }

    fn judge(
        &self,
        check: ConditionCheck,
    ) -> Result<ConditionVerdict> {
        let edge = &check.edge;
        let check_result = match &edge.condition {
            Some(condition) => condition.evaluate(edge, Subject::Branch(&self.ctx)).map_err(|e| MailflowError::condition(&edge.head, &edge.tail, e))?,
            None => true,
        };
        tracing::trace!(branch = %self.id, edge = %edge.id, correlation = %check.correlation, check_result, "condition judged");
        Ok(ConditionVerdict {
            correlation: check.correlation,
            edge_id: check.edge.id,
            check_result,
        })
    }

    fn send(
        &self,
        recipient: &ActorId,
        payload: Payload,
    ) {
        write(&self.mailbox).send(Mail::new(self.id.clone(), recipient.clone(), self.id.clone(), payload));
    }
}

impl Actor for BranchExecutor {
    fn id(&self) -> &ActorId {
        &self.id
    }

    fn mailbox(&self) -> ShareLock<Mailbox> {
        self.mailbox.clone()
    }
}

#[async_trait]
impl Executor for BranchExecutor {
    fn halt_signal(&self) -> Arc<Shutdown> {
        self.halt.clone()
    }

    async fn forward(&self) -> Result<()> {
        while !self.is_halted() {
            let next = write(&self.mailbox).next_in();
            let Some(mail) = next else {
                break;
            };
            self.interpret(mail).await?;
        }
        Ok(())
    }

    fn responses(&self) -> Vec<Value> {
        self.ctx.responses()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        Config,
        graph::{ConditionRegistry, Edge, Node, ResponseMatches},
        mail::MailCategory,
        runtime::RecordingProcessor,
    };

    fn services(processor: Arc<RecordingProcessor>) -> Services {
        Services::new(processor, Arc::new(ConditionRegistry::default()), Arc::new(Config::default()))
    }

    fn deliver(
        branch: &BranchExecutor,
        payload: Payload,
    ) {
        write(&branch.mailbox).deliver(Mail::new("graph", branch.id.clone(), branch.id.clone(), payload));
    }

    fn outs(branch: &BranchExecutor) -> Vec<Mail> {
        write(&branch.mailbox).take_outs().into_iter().collect()
    }

    #[tokio::test]
    async fn test_start_adopts_context() {
        let branch = BranchExecutor::new(services(Arc::new(RecordingProcessor::new())));
        deliver(
            &branch,
            Payload::Start(StartRequest {
                context: json!({"topic": "rust"}),
                graph_id: "graph".to_string(),
            }),
        );
        branch.forward().await.unwrap();
        assert_eq!(branch.context().pending(), Some(json!({"topic": "rust"})));
        let out = outs(&branch);
        assert_eq!(out[0].recipient, "graph");
        assert_eq!(out[0].category(), MailCategory::Start);
        assert_eq!(out[0].request_source(), &branch.id);
    }

    #[tokio::test]
    async fn test_node_is_processed_and_acknowledged() {
        let processor = Arc::new(RecordingProcessor::new());
        let branch = BranchExecutor::with_context(services(processor.clone()), Context::with_context(json!("hi")));
        deliver(&branch, Payload::Node(Step::Node(Node::instruction("I", "answer"))));
        branch.forward().await.unwrap();

        assert_eq!(processor.processed(), vec!["I"]);
        assert_eq!(processor.context_of("I"), Some(json!("hi")));
        assert_eq!(branch.responses(), vec![json!("answer")]);
        assert_eq!(branch.context().output(&"I".to_string()).unwrap().get::<String>("value"), Some("answer".to_string()));
        assert!(matches!(outs(&branch)[0].payload(), Payload::NodeId(id) if id == "I"));
    }

    #[tokio::test]
    async fn test_condition_is_judged_locally() {
        let branch = BranchExecutor::new(services(Arc::new(RecordingProcessor::new())));
        branch.context().push_response(json!("APPROVED"));
        let edge = Edge::new("e1", "A", "B").with_condition(Some(Arc::new(ResponseMatches::new("^APPROVED$").unwrap())));
        deliver(
            &branch,
            Payload::ConditionCheck(ConditionCheck {
                correlation: "c1".to_string(),
                edge,
            }),
        );
        branch.forward().await.unwrap();
        match outs(&branch).remove(0).package.payload {
            Payload::ConditionVerdict(verdict) => {
                assert_eq!(verdict.correlation, "c1");
                assert_eq!(verdict.edge_id, "e1");
                assert!(verdict.check_result);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_end_halts_and_echoes() {
        let branch = BranchExecutor::new(services(Arc::new(RecordingProcessor::new())));
        deliver(&branch, Payload::End);
        deliver(&branch, Payload::NodeId("ignored".to_string()));
        branch.forward().await.unwrap();
        assert!(branch.is_halted());
        let out = outs(&branch);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].category(), MailCategory::End);
    }

    #[tokio::test]
    async fn test_lone_branch_cannot_fork() {
        let branch = BranchExecutor::new(services(Arc::new(RecordingProcessor::new())));
        deliver(&branch, Payload::NodeList(vec![Step::Node(Node::instruction("A", "a"))]));
        let err = branch.forward().await.unwrap_err();
        assert!(matches!(err, MailflowError::UnroutableMail { category: MailCategory::NodeList, .. }));
    }
}
