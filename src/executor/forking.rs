//! Branch forking executor.
//!
//! Runs every branch of one workflow behind a single actor. Branches live on
//! an internal mail manager next to a transfer mailbox that relays between
//! them and the graph executor:
//! - inbound `start` creates the first branch
//! - inbound `node_list` keeps the first step on the requesting branch and
//!   forks one new branch per further step
//! - other inbound mail is handed to the branch named by `request_source`
//! - branch mail goes back to the graph, except `end`, which is counted
//!
//! Once every branch ever created has ended, one `end` goes to the graph and
//! the executor halts.

use std::sync::{
    Arc, RwLock,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::Value;
use tokio::sync::Notify;

use crate::{
    MailflowError, Result, ShareLock,
    common::{Shutdown, read, write},
    executor::{BranchExecutor, Executor},
    graph::Step,
    mail::{Actor, ActorId, Mail, MailManager, Mailbox, Payload},
    runtime::{Context, Services},
    utils,
};

pub struct BranchForkingExecutor {
    id: ActorId,
    mailbox: ShareLock<Mailbox>,
    halt: Arc<Shutdown>,
    transfer_id: ActorId,
    transfer: ShareLock<Mailbox>,
    manager: MailManager,
    branches: RwLock<Vec<Arc<BranchExecutor>>>,
    ends: AtomicUsize,
    graph_id: RwLock<Option<ActorId>>,
    services: Services,
}

impl BranchForkingExecutor {
    pub fn new(services: Services) -> Self {
        let transfer_id = format!("transfer-{}", utils::longid());
        let transfer = Arc::new(RwLock::new(Mailbox::new()));
        let manager = MailManager::new();
        manager.add_mailbox(&transfer_id, &transfer);

        Self {
            id: format!("forking-{}", utils::longid()),
            mailbox: Arc::new(RwLock::new(Mailbox::new())),
            halt: Arc::new(Shutdown::new()),
            transfer_id,
            transfer,
            manager,
            branches: RwLock::new(Vec::new()),
            ends: AtomicUsize::new(0),
            graph_id: RwLock::new(None),
            services,
        }
    }

    /// Number of branches created so far.
    pub fn branch_count(&self) -> usize {
        read(&self.branches).len()
    }

    pub fn end_count(&self) -> usize {
        self.ends.load(Ordering::SeqCst)
    }

    pub fn branches(&self) -> Vec<Arc<BranchExecutor>> {
        read(&self.branches).clone()
    }

    fn spawn_branch(
        &self,
        ctx: Context,
    ) -> Arc<BranchExecutor> {
        let branch = Arc::new(BranchExecutor::with_context(self.services.clone(), ctx));
        self.manager.add_source(branch.as_ref());
        write(&self.branches).push(branch.clone());
        branch
    }

    fn branch(
        &self,
        id: &str,
    ) -> Result<Arc<BranchExecutor>> {
        read(&self.branches).iter().find(|b| b.id() == id).cloned().ok_or(MailflowError::Mail(format!("branch {} is unknown to {}", id, self.id)))
    }

    fn graph_id(&self) -> Result<ActorId> {
        read(&self.graph_id).clone().ok_or(MailflowError::Mail(format!("{} has not been started", self.id)))
    }

    fn to_branch(
        &self,
        branch: &ActorId,
        payload: Payload,
    ) {
        write(&self.transfer).send(Mail::new(self.transfer_id.clone(), branch.clone(), branch.clone(), payload));
    }

    /// Mail arriving from the graph.
    fn transfer_ins(&self) -> Result<()> {
        loop {
            let next = write(&self.mailbox).next_in();
            let Some(mail) = next else {
                return Ok(());
            };
            let category = mail.category();
            let source = mail.request_source().clone();

            match mail.package.payload {
                Payload::Start(request) => {
                    *write(&self.graph_id) = Some(request.graph_id.clone());
                    let branch = self.spawn_branch(Context::with_context(request.context.clone()));
                    tracing::debug!(executor = %self.id, branch = %branch.id(), "first branch created");
                    write(&self.mailbox).send(Mail::new(self.id.clone(), request.graph_id.clone(), branch.id().clone(), Payload::Start(request)));
                }
                Payload::NodeList(steps) => self.fork(&source, steps)?,
                payload @ (Payload::Node(_) | Payload::ConditionCheck(_) | Payload::End) => {
                    self.branch(&source)?;
                    self.to_branch(&source, payload);
                }
                Payload::NodeId(_) | Payload::ConditionVerdict(_) => {
                    return Err(MailflowError::UnroutableMail {
                        actor: self.id.clone(),
                        category,
                    });
                }
            }
        }
    }

    fn fork(
        &self,
        source: &ActorId,
        steps: Vec<Step>,
    ) -> Result<()> {
        let origin = self.branch(source)?;
        let mut steps = steps.into_iter();
        if let Some(first) = steps.next() {
            self.to_branch(source, Payload::Node(first));
        }
        for step in steps {
            let branch = self.spawn_branch(origin.context().fork(self.services.config.context_sharing));
            tracing::debug!(executor = %self.id, origin = %source, branch = %branch.id(), node = %step.id(), "branch forked");
            self.to_branch(branch.id(), Payload::Node(step));
        }
        Ok(())
    }

    /// Mail arriving from the branches.
    fn transfer_outs(&self) -> Result<()> {
        loop {
            let next = write(&self.transfer).next_in();
            let Some(mail) = next else {
                return Ok(());
            };

            if let Payload::End = mail.payload() {
                let ends = self.ends.fetch_add(1, Ordering::SeqCst) + 1;
                let total = self.branch_count();
                tracing::trace!(executor = %self.id, branch = %mail.sender, ends, total, "branch ended");
                if ends == total {
                    let graph_id = self.graph_id()?;
                    write(&self.mailbox).send(Mail::new(self.id.clone(), graph_id, self.id.clone(), Payload::End));
                    tracing::debug!(executor = %self.id, branches = total, "all branches ended, halting");
                    self.halt.shutdown();
                    return Ok(());
                }
                continue;
            }

            let graph_id = self.graph_id()?;
            write(&self.mailbox).send(mail.readdress(&self.id, &graph_id));
        }
    }

    fn route(&self) -> Result<()> {
        self.manager.collect_all()?;
        self.manager.send_all()?;
        Ok(())
    }
}

impl Actor for BranchForkingExecutor {
    fn id(&self) -> &ActorId {
        &self.id
    }

    fn mailbox(&self) -> ShareLock<Mailbox> {
        self.mailbox.clone()
    }
}

#[async_trait]
impl Executor for BranchForkingExecutor {
    fn halt_signal(&self) -> Arc<Shutdown> {
        self.halt.clone()
    }

    async fn forward(&self) -> Result<()> {
        self.route()?;
        self.transfer_outs()?;
        if self.is_halted() {
            return Ok(());
        }
        self.transfer_ins()?;
        self.route()?;

        let active: Vec<_> = self.branches().into_iter().filter(|b| !b.is_halted() && b.has_mail()).collect();
        try_join_all(active.iter().map(|b| b.forward())).await?;
        Ok(())
    }

    fn wakers(&self) -> Vec<Arc<Notify>> {
        vec![read(&self.mailbox).notifier(), self.manager.notifier()]
    }

    /// Responses of every branch, in branch creation order.
    fn responses(&self) -> Vec<Value> {
        self.branches().iter().flat_map(|b| b.responses()).collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        Config,
        graph::{ConditionRegistry, Node},
        mail::{MailCategory, StartRequest},
        runtime::{ContextSharing, RecordingProcessor},
    };

    const GRAPH: &str = "graph";

    fn forking(sharing: ContextSharing) -> BranchForkingExecutor {
        let config = Config {
            context_sharing: sharing,
            ..Config::default()
        };
        let services = Services::new(Arc::new(RecordingProcessor::new()), Arc::new(ConditionRegistry::default()), Arc::new(config));
        BranchForkingExecutor::new(services)
    }

    fn deliver(
        exec: &BranchForkingExecutor,
        source: &str,
        payload: Payload,
    ) {
        write(&exec.mailbox).deliver(Mail::new(GRAPH, exec.id.clone(), source, payload));
    }

    fn outs(exec: &BranchForkingExecutor) -> Vec<Mail> {
        write(&exec.mailbox).take_outs().into_iter().collect()
    }

    fn node(id: &str) -> Step {
        Step::Node(Node::instruction(id, id))
    }

    async fn started(exec: &BranchForkingExecutor) -> ActorId {
        deliver(
            exec,
            "agent",
            Payload::Start(StartRequest {
                context: json!({"seed": 1}),
                graph_id: GRAPH.to_string(),
            }),
        );
        exec.forward().await.unwrap();
        let out = outs(exec);
        assert_eq!(out[0].category(), MailCategory::Start);
        assert_eq!(out[0].recipient, GRAPH);
        out[0].request_source().clone()
    }

    #[tokio::test]
    async fn test_node_round_trip_through_branch() {
        let exec = forking(ContextSharing::Isolated);
        let first = started(&exec).await;
        assert_eq!(exec.branch_count(), 1);

        deliver(&exec, &first, Payload::Node(node("A")));
        // hand to the branch, branch processes
        exec.forward().await.unwrap();
        // collect the branch's node_id and relay it to the graph
        exec.forward().await.unwrap();

        let out = outs(&exec);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sender, exec.id);
        assert_eq!(out[0].recipient, GRAPH);
        assert_eq!(out[0].request_source(), &first);
        assert!(matches!(out[0].payload(), Payload::NodeId(id) if id == "A"));
        assert_eq!(exec.responses(), vec![json!("A")]);
    }

    #[tokio::test]
    async fn test_fork_and_count_ends() {
        let exec = forking(ContextSharing::Isolated);
        let first = started(&exec).await;

        deliver(&exec, &first, Payload::NodeList(vec![node("B"), node("C"), node("D")]));
        exec.forward().await.unwrap();
        assert_eq!(exec.branch_count(), 3);
        exec.forward().await.unwrap();

        let out = outs(&exec);
        let mut sources: Vec<_> = out.iter().map(|m| m.request_source().clone()).collect();
        sources.sort();
        sources.dedup();
        assert_eq!(out.len(), 3);
        assert_eq!(sources.len(), 3);
        assert!(sources.contains(&first));

        // forked branches start from a copy of the origin's context
        for branch in exec.branches().iter().skip(1) {
            assert!(!branch.context().is_shared_with(&exec.branches()[0].context()));
            assert_eq!(branch.context().log(), vec![json!({"seed": 1})]);
        }

        for branch in exec.branches() {
            deliver(&exec, branch.id(), Payload::End);
        }
        exec.forward().await.unwrap();
        assert!(!exec.is_halted());
        exec.forward().await.unwrap();

        assert!(exec.is_halted());
        assert_eq!(exec.end_count(), exec.branch_count());
        let out = outs(&exec);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].category(), MailCategory::End);
        assert_eq!(out[0].recipient, GRAPH);
    }

    #[tokio::test]
    async fn test_shared_forks() {
        let exec = forking(ContextSharing::Shared);
        let first = started(&exec).await;
        deliver(&exec, &first, Payload::NodeList(vec![node("B"), node("C")]));
        exec.forward().await.unwrap();
        let branches = exec.branches();
        assert!(branches[1].context().is_shared_with(&branches[0].context()));
    }

    #[tokio::test]
    async fn test_unknown_branch_and_unroutable() {
        let exec = forking(ContextSharing::Isolated);
        started(&exec).await;

        deliver(&exec, "ghost", Payload::Node(node("A")));
        assert!(matches!(exec.forward().await, Err(MailflowError::Mail(_))));

        deliver(&exec, "ghost", Payload::NodeId("A".to_string()));
        let err = exec.forward().await.unwrap_err();
        assert!(matches!(err, MailflowError::UnroutableMail { category: MailCategory::NodeId, .. }));
    }
}
