//! Per-actor mailbox.
//!
//! Inbound mail is grouped by sender and kept FIFO per sender. Senders are
//! served in the order they first wrote to this mailbox.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use tokio::sync::{Notify, oneshot};

use crate::mail::{ActorId, ConditionVerdict, CorrelationId, Mail};

#[derive(Debug, Default)]
pub struct Mailbox {
    pending_in: HashMap<ActorId, VecDeque<Mail>>,
    senders: Vec<ActorId>,
    pending_out: VecDeque<Mail>,
    awaiting: HashMap<CorrelationId, oneshot::Sender<ConditionVerdict>>,
    inbound: Arc<Notify>,
    outbound: Option<Arc<Notify>>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `mail` for the next collect.
    pub fn send(
        &mut self,
        mail: Mail,
    ) {
        self.pending_out.push_back(mail);
        if let Some(outbound) = &self.outbound {
            outbound.notify_one();
        }
    }

    /// Accepts an inbound mail.
    ///
    /// A verdict whose correlation id is awaited resolves that waiter and is
    /// not queued. Anything else, including a verdict nobody waits for any
    /// more, lands in `pending_in`.
    pub fn deliver(
        &mut self,
        mail: Mail,
    ) {
        let waiter = mail.as_verdict().and_then(|verdict| self.awaiting.remove(&verdict.correlation));
        if let Some(waiter) = waiter {
            if let Some(verdict) = mail.as_verdict() {
                if waiter.send(verdict.clone()).is_ok() {
                    return;
                }
                tracing::trace!(mail = %mail.id, "verdict waiter dropped");
            }
        }

        if !self.pending_in.contains_key(&mail.sender) {
            self.senders.push(mail.sender.clone());
        }
        self.pending_in.entry(mail.sender.clone()).or_default().push_back(mail);
        self.inbound.notify_one();
    }

    /// Oldest mail of the first sender with anything queued.
    pub fn next_in(&mut self) -> Option<Mail> {
        let sender = self.senders.iter().find(|s| self.pending_in.get(*s).is_some_and(|q| !q.is_empty()))?.clone();
        self.pop_from(&sender)
    }

    pub fn pop_from(
        &mut self,
        sender: &str,
    ) -> Option<Mail> {
        self.pending_in.get_mut(sender).and_then(|q| q.pop_front())
    }

    /// Drains the outbound queue.
    pub fn take_outs(&mut self) -> VecDeque<Mail> {
        std::mem::take(&mut self.pending_out)
    }

    pub fn peek_outs(&self) -> impl Iterator<Item = &Mail> {
        self.pending_out.iter()
    }

    /// Registers a waiter resolved by the verdict carrying `correlation`.
    pub fn expect_verdict(
        &mut self,
        correlation: &CorrelationId,
    ) -> oneshot::Receiver<ConditionVerdict> {
        let (tx, rx) = oneshot::channel();
        self.awaiting.insert(correlation.clone(), tx);
        rx
    }

    pub fn forget_verdict(
        &mut self,
        correlation: &CorrelationId,
    ) {
        self.awaiting.remove(correlation);
    }

    /// Signalled whenever inbound mail is queued.
    pub fn notifier(&self) -> Arc<Notify> {
        self.inbound.clone()
    }

    /// Signalled whenever outbound mail is queued.
    pub fn set_outbound(
        &mut self,
        outbound: Arc<Notify>,
    ) {
        self.outbound = Some(outbound);
    }

    pub fn has_pending_in(&self) -> bool {
        self.pending_in.values().any(|q| !q.is_empty())
    }

    pub fn has_pending_out(&self) -> bool {
        !self.pending_out.is_empty()
    }

    pub fn in_count(&self) -> usize {
        self.pending_in.values().map(|q| q.len()).sum()
    }

    pub fn out_count(&self) -> usize {
        self.pending_out.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::Payload;

    fn mail(
        sender: &str,
        node: &str,
    ) -> Mail {
        Mail::new(sender, "me", sender, Payload::NodeId(node.to_string()))
    }

    fn node_of(mail: Mail) -> String {
        match mail.package.payload {
            Payload::NodeId(id) => id,
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_fifo_per_sender() {
        let mut mailbox = Mailbox::new();
        mailbox.deliver(mail("a", "1"));
        mailbox.deliver(mail("b", "x"));
        mailbox.deliver(mail("a", "2"));
        mailbox.deliver(mail("a", "3"));
        assert_eq!(mailbox.in_count(), 4);

        assert_eq!(node_of(mailbox.pop_from("a").unwrap()), "1");
        assert_eq!(node_of(mailbox.pop_from("a").unwrap()), "2");
        assert_eq!(node_of(mailbox.next_in().unwrap()), "3");
        assert_eq!(node_of(mailbox.next_in().unwrap()), "x");
        assert!(mailbox.next_in().is_none());
        assert!(!mailbox.has_pending_in());
    }

    #[test]
    fn test_send_and_take_outs() {
        let mut mailbox = Mailbox::new();
        let outbound = Arc::new(Notify::new());
        mailbox.set_outbound(outbound);
        mailbox.send(mail("me", "1"));
        mailbox.send(mail("me", "2"));
        assert!(mailbox.has_pending_out());
        let outs = mailbox.take_outs();
        assert_eq!(outs.len(), 2);
        assert_eq!(mailbox.out_count(), 0);
    }

    #[tokio::test]
    async fn test_verdict_resolves_waiter() {
        let mut mailbox = Mailbox::new();
        let rx = mailbox.expect_verdict(&"c1".to_string());

        // unrelated correlation id is queued, not consumed
        let stray = ConditionVerdict {
            correlation: "other".to_string(),
            edge_id: "e".to_string(),
            check_result: true,
        };
        mailbox.deliver(Mail::new("b", "me", "b", Payload::ConditionVerdict(stray)));
        assert_eq!(mailbox.in_count(), 1);

        let verdict = ConditionVerdict {
            correlation: "c1".to_string(),
            edge_id: "e".to_string(),
            check_result: false,
        };
        mailbox.deliver(Mail::new("b", "me", "b", Payload::ConditionVerdict(verdict.clone())));
        assert_eq!(mailbox.in_count(), 1);
        assert_eq!(rx.await.unwrap(), verdict);
    }

    #[test]
    fn test_forgotten_verdict_is_queued() {
        let mut mailbox = Mailbox::new();
        let correlation = "c1".to_string();
        let _rx = mailbox.expect_verdict(&correlation);
        mailbox.forget_verdict(&correlation);
        let verdict = ConditionVerdict {
            correlation,
            edge_id: "e".to_string(),
            check_result: true,
        };
        mailbox.deliver(Mail::new("b", "me", "b", Payload::ConditionVerdict(verdict)));
        assert!(mailbox.has_pending_in());
    }
}
