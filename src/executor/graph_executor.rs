//! Graph executor: advances the workflow position of every branch.
//!
//! It owns the graph and answers branch mail:
//! - `start`: the resolved heads
//! - `node` / `node_id`: the resolved successors whose edge conditions hold
//! - `end`: halts
//!
//! Successors are replied as `end` (none), `node` (one) or `node_list`
//! (several), always to the sender and with the incoming `request_source`.

use std::{
    sync::{Arc, RwLock},
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    MailflowError, Result, ShareLock,
    common::{Shutdown, write},
    executor::Executor,
    graph::{ConditionScope, Edge, Graph, Step, Subject},
    mail::{Actor, ActorId, ConditionCheck, Mail, Mailbox, Payload},
    utils,
};

pub struct GraphExecutor {
    id: ActorId,
    graph: Graph,
    mailbox: ShareLock<Mailbox>,
    halt: Arc<Shutdown>,
    condition_timeout: Duration,
}

impl GraphExecutor {
    pub fn new(
        graph: Graph,
        condition_timeout: Duration,
    ) -> Self {
        Self {
            id: format!("graph-{}", utils::longid()),
            graph,
            mailbox: Arc::new(RwLock::new(Mailbox::new())),
            halt: Arc::new(Shutdown::new()),
            condition_timeout,
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    async fn interpret(
        &self,
        mail: Mail,
    ) -> Result<()> {
        let category = mail.category();
        let Mail {
            sender,
            package,
            ..
        } = mail;
        let source = package.request_source;

        match package.payload {
            Payload::Start(_) => {
                let steps = self.graph.heads().iter().map(|nid| self.graph.resolve(nid)).collect::<Result<Vec<_>>>()?;
                tracing::trace!(graph = %self.id, branch = %source, heads = steps.len(), "start");
                self.reply(&sender, &source, steps);
            }
            Payload::Node(step) => {
                let steps = self.advance(step.id(), &sender, &source).await?;
                self.reply(&sender, &source, steps);
            }
            Payload::NodeId(nid) => {
                let steps = self.advance(&nid, &sender, &source).await?;
                self.reply(&sender, &source, steps);
            }
            Payload::End => {
                tracing::debug!(graph = %self.id, from = %sender, "end received, halting");
                self.halt.shutdown();
            }
            Payload::ConditionVerdict(verdict) => {
                tracing::warn!(graph = %self.id, correlation = %verdict.correlation, edge = %verdict.edge_id, "verdict without a waiter dropped");
            }
            Payload::NodeList(_) | Payload::ConditionCheck(_) => {
                return Err(MailflowError::UnroutableMail {
                    actor: self.id.clone(),
                    category,
                });
            }
        }
        Ok(())
    }

    /// Resolved successors of `nid` whose edge conditions hold, in edge
    /// insertion order.
    async fn advance(
        &self,
        nid: &str,
        sender: &ActorId,
        source: &ActorId,
    ) -> Result<Vec<Step>> {
        if !self.graph.node_exists(nid) {
            return Err(MailflowError::Structure(format!("node {} not found in graph {}", nid, self.id)));
        }

        let mut steps = Vec::new();
        for edge in self.graph.outgoing(nid)? {
            if edge.bundle {
                continue;
            }
            if self.check(edge, sender, source).await? {
                steps.push(self.graph.resolve(&edge.tail)?);
            }
        }
        Ok(steps)
    }

    async fn check(
        &self,
        edge: &Edge,
        sender: &ActorId,
        source: &ActorId,
    ) -> Result<bool> {
        let Some(condition) = &edge.condition else {
            return Ok(true);
        };
        match condition.scope() {
            ConditionScope::Structure => condition.evaluate(edge, Subject::Graph(&self.graph)).map_err(|e| MailflowError::condition(&edge.head, &edge.tail, e)),
            ConditionScope::Executable => self.remote_check(edge, sender, source).await,
        }
    }

    /// Ships the condition to the actor that sent the step and waits for the
    /// verdict carrying the same correlation id.
    async fn remote_check(
        &self,
        edge: &Edge,
        sender: &ActorId,
        source: &ActorId,
    ) -> Result<bool> {
        let correlation = utils::longid();
        let rx = {
            let mut mailbox = write(&self.mailbox);
            let rx = mailbox.expect_verdict(&correlation);
            let check = ConditionCheck {
                correlation: correlation.clone(),
                edge: edge.clone(),
            };
            mailbox.send(Mail::new(self.id.clone(), sender.clone(), source.clone(), Payload::ConditionCheck(check)));
            rx
        };
        tracing::trace!(graph = %self.id, edge = %edge.id, branch = %source, correlation = %correlation, "condition check sent");

        match tokio::time::timeout(self.condition_timeout, rx).await {
            Ok(Ok(verdict)) if verdict.edge_id == edge.id => Ok(verdict.check_result),
            Ok(Ok(verdict)) => Err(MailflowError::condition(&edge.head, &edge.tail, format!("verdict answers edge {} instead of {}", verdict.edge_id, edge.id))),
            Ok(Err(_)) => Err(MailflowError::Mail(format!("verdict waiter {} was dropped", correlation))),
            Err(_) => {
                write(&self.mailbox).forget_verdict(&correlation);
                Err(MailflowError::ConditionTimeout {
                    edge: edge.id.clone(),
                    head: edge.head.clone(),
                    tail: edge.tail.clone(),
                    timeout_ms: self.condition_timeout.as_millis() as u64,
                })
            }
        }
    }

    fn reply(
        &self,
        recipient: &ActorId,
        source: &ActorId,
        steps: Vec<Step>,
    ) {
        let payload = Payload::from_steps(steps);
        tracing::trace!(graph = %self.id, to = %recipient, branch = %source, category = %payload.category(), "reply");
        write(&self.mailbox).send(Mail::new(self.id.clone(), recipient.clone(), source.clone(), payload));
    }
}

impl Actor for GraphExecutor {
    fn id(&self) -> &ActorId {
        &self.id
    }

    fn mailbox(&self) -> ShareLock<Mailbox> {
        self.mailbox.clone()
    }
}

#[async_trait]
impl Executor for GraphExecutor {
    fn halt_signal(&self) -> Arc<Shutdown> {
        self.halt.clone()
    }

    fn validate(&self) -> Result<()> {
        self.graph.validate()
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
}
