//! Mail routing between registered actors.
//!
//! Routing is two-phase: [`MailManager::collect_all`] moves every outbound
//! mail into a per-recipient buffer, then [`MailManager::send_all`] hands the
//! buffered mail over. A tick therefore delivers one consistent snapshot.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, RwLock, Weak},
};

use tokio::sync::Notify;

use crate::{
    MailflowError, Result, ShareLock,
    common::{Queue, Shutdown, read, write},
    mail::{Actor, ActorId, Mail, Mailbox, Payload},
    runtime::{Cadence, Ticker},
};

/// recipient -> sender -> mail, in collect order
type Buffer = HashMap<ActorId, HashMap<ActorId, VecDeque<Mail>>>;

#[derive(Default)]
pub struct MailManager {
    sources: RwLock<HashMap<ActorId, Weak<RwLock<Mailbox>>>>,
    buffer: RwLock<Buffer>,
    journal: Option<Arc<Queue<Mail>>>,
    outbound: Arc<Notify>,
}

impl MailManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps a copy of every collected mail in a bounded queue. When the
    /// queue is full further copies are dropped.
    pub fn with_journal(
        mut self,
        capacity: usize,
    ) -> Self {
        if capacity > 0 {
            self.journal = Some(Queue::new(capacity));
        }
        self
    }

    pub fn journal(&self) -> Option<Arc<Queue<Mail>>> {
        self.journal.clone()
    }

    /// Signalled whenever a registered mailbox queues outbound mail.
    pub fn notifier(&self) -> Arc<Notify> {
        self.outbound.clone()
    }

    /// Registers `actor`. The manager only keeps a weak handle on its mailbox.
    pub fn add_source(
        &self,
        actor: &dyn Actor,
    ) {
        self.add_mailbox(actor.id(), &actor.mailbox());
    }

    pub fn add_sources(
        &self,
        actors: &[&dyn Actor],
    ) {
        for actor in actors {
            self.add_source(*actor);
        }
    }

    pub(crate) fn add_mailbox(
        &self,
        id: &ActorId,
        mailbox: &ShareLock<Mailbox>,
    ) {
        write(mailbox).set_outbound(self.outbound.clone());
        write(&self.sources).insert(id.clone(), Arc::downgrade(mailbox));
        tracing::trace!(actor = %id, "source added");
    }

    pub fn delete_source(
        &self,
        id: &str,
    ) -> Result<()> {
        match write(&self.sources).remove(id) {
            Some(_) => {
                write(&self.buffer).remove(id);
                Ok(())
            }
            None => Err(MailflowError::Mail(format!("actor {} is not registered", id))),
        }
    }

    pub fn contains(
        &self,
        id: &str,
    ) -> bool {
        read(&self.sources).contains_key(id)
    }

    pub fn source_ids(&self) -> Vec<ActorId> {
        let mut ids: Vec<_> = read(&self.sources).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Queues a mail from `sender`, which need not be registered, for the
    /// next send to `recipient`.
    pub fn create_mail(
        &self,
        sender: &str,
        recipient: &str,
        request_source: &str,
        payload: Payload,
    ) -> Result<()> {
        if !self.contains(recipient) {
            return Err(MailflowError::Mail(format!("recipient {} is not registered", recipient)));
        }
        let mail = Mail::new(sender, recipient, request_source, payload);
        self.record(&mail);
        write(&self.buffer).entry(mail.recipient.clone()).or_default().entry(mail.sender.clone()).or_default().push_back(mail);
        Ok(())
    }

    /// Drains `sender`'s outbound queue into the buffer. Nothing is drained
    /// when any of its mail names an unregistered recipient.
    pub fn collect(
        &self,
        sender: &str,
    ) -> Result<usize> {
        let mailbox = self.mailbox(sender)?;
        let outs = {
            let mut mailbox = write(&mailbox);
            if let Some(mail) = mailbox.peek_outs().find(|m| !self.contains(&m.recipient)) {
                return Err(MailflowError::Mail(format!("mail {} from {} names unregistered recipient {}", mail.id, sender, mail.recipient)));
            }
            mailbox.take_outs()
        };

        let count = outs.len();
        let mut buffer = write(&self.buffer);
        for mail in outs {
            tracing::trace!(mail = %mail.id, sender = %mail.sender, recipient = %mail.recipient, category = %mail.category(), "collect");
            self.record(&mail);
            buffer.entry(mail.recipient.clone()).or_default().entry(sender.to_string()).or_default().push_back(mail);
        }
        Ok(count)
    }

    /// Appends every buffered mail for `recipient` onto its inbound queues.
    pub fn send(
        &self,
        recipient: &str,
    ) -> Result<usize> {
        let mailbox = self.mailbox(recipient)?;
        let Some(by_sender) = write(&self.buffer).remove(recipient) else {
            return Ok(0);
        };

        let mut mailbox = write(&mailbox);
        let mut count = 0;
        for (_, queue) in by_sender {
            for mail in queue {
                mailbox.deliver(mail);
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn collect_all(&self) -> Result<usize> {
        self.prune();
        let mut count = 0;
        for id in self.source_ids() {
            count += self.collect(&id)?;
        }
        Ok(count)
    }

    pub fn send_all(&self) -> Result<usize> {
        let recipients: Vec<_> = read(&self.buffer).keys().cloned().collect();
        let mut count = 0;
        for id in recipients {
            count += self.send(&id)?;
        }
        Ok(count)
    }

    /// Routes mail every tick until all of `until` have terminated. The last
    /// round is routed before the check so final mail still arrives.
    pub async fn execute(
        &self,
        cadence: &Cadence,
        until: &[Arc<Shutdown>],
    ) -> Result<()> {
        let mut ticker = Ticker::new(cadence, vec![self.notifier()]);
        loop {
            self.collect_all()?;
            self.send_all()?;
            if until.iter().all(|s| s.is_terminated()) {
                tracing::trace!("all watched actors halted, routing stopped");
                return Ok(());
            }
            ticker.tick().await;
        }
    }

    fn mailbox(
        &self,
        id: &str,
    ) -> Result<ShareLock<Mailbox>> {
        let weak = read(&self.sources).get(id).cloned().ok_or(MailflowError::Mail(format!("actor {} is not registered", id)))?;
        weak.upgrade().ok_or(MailflowError::Mail(format!("mailbox of actor {} was dropped", id)))
    }

    /// Forgets actors whose mailbox no longer exists.
    fn prune(&self) {
        write(&self.sources).retain(|id, weak| {
            let alive = weak.strong_count() > 0;
            if !alive {
                tracing::debug!(actor = %id, "dropping source with released mailbox");
            }
            alive
        });
    }

    fn record(
        &self,
        mail: &Mail,
    ) {
        if let Some(journal) = &self.journal {
            if journal.try_send(mail.clone()).is_err() {
                tracing::trace!(mail = %mail.id, "journal full, copy dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::MailCategory;

    struct Probe {
        id: ActorId,
        mailbox: ShareLock<Mailbox>,
    }

    impl Probe {
        fn new(id: &str) -> Self {
            Self {
                id: id.to_string(),
                mailbox: Arc::new(RwLock::new(Mailbox::new())),
            }
        }

        fn post(
            &self,
            to: &str,
            node: &str,
        ) {
            write(&self.mailbox).send(Mail::new(self.id.clone(), to, self.id.clone(), Payload::NodeId(node.to_string())));
        }
    }

    impl Actor for Probe {
        fn id(&self) -> &ActorId {
            &self.id
        }

        fn mailbox(&self) -> ShareLock<Mailbox> {
            self.mailbox.clone()
        }
    }

    fn node_of(mail: Mail) -> String {
        match mail.package.payload {
            Payload::NodeId(id) => id,
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_collect_then_send_keeps_sender_order() {
        let (a, b) = (Probe::new("a"), Probe::new("b"));
        let manager = MailManager::new();
        manager.add_sources(&[&a, &b]);

        a.post("b", "1");
        a.post("b", "2");
        assert_eq!(manager.collect_all().unwrap(), 2);
        // nothing arrives before send
        assert!(!read(&b.mailbox).has_pending_in());

        a.post("b", "3");
        assert_eq!(manager.send_all().unwrap(), 2);
        assert_eq!(manager.collect_all().unwrap(), 1);
        assert_eq!(manager.send_all().unwrap(), 1);

        let mut mailbox = write(&b.mailbox);
        let got: Vec<_> = std::iter::from_fn(|| mailbox.pop_from("a")).map(node_of).collect();
        assert_eq!(got, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_unknown_recipient_keeps_outbox() {
        let a = Probe::new("a");
        let manager = MailManager::new();
        manager.add_source(&a);
        a.post("ghost", "1");

        assert!(matches!(manager.collect("a"), Err(MailflowError::Mail(_))));
        assert_eq!(read(&a.mailbox).out_count(), 1);
        assert!(manager.collect("nobody").is_err());
        assert!(manager.send("nobody").is_err());
    }

    #[test]
    fn test_delete_source() {
        let a = Probe::new("a");
        let manager = MailManager::new();
        manager.add_source(&a);
        assert!(manager.contains("a"));
        manager.delete_source("a").unwrap();
        assert!(!manager.contains("a"));
        assert!(manager.delete_source("a").is_err());
    }

    #[test]
    fn test_dropped_mailbox_is_pruned() {
        let manager = MailManager::new();
        {
            let a = Probe::new("a");
            manager.add_source(&a);
        }
        assert_eq!(manager.collect_all().unwrap(), 0);
        assert!(!manager.contains("a"));
    }

    #[test]
    fn test_create_mail_and_journal() {
        let b = Probe::new("b");
        let manager = MailManager::new().with_journal(8);
        manager.add_source(&b);

        manager.create_mail("outside", "b", "outside", Payload::End).unwrap();
        assert!(manager.create_mail("outside", "ghost", "outside", Payload::End).is_err());
        assert_eq!(manager.send_all().unwrap(), 1);

        let mail = write(&b.mailbox).next_in().unwrap();
        assert_eq!(mail.category(), MailCategory::End);
        assert_eq!(mail.sender, "outside");

        let journal = manager.journal().unwrap();
        assert_eq!(journal.len(), 1);
    }

    #[tokio::test]
    async fn test_execute_stops_after_final_round() {
        let (a, b) = (Probe::new("a"), Probe::new("b"));
        let manager = MailManager::new();
        manager.add_sources(&[&a, &b]);

        let halted = Arc::new(Shutdown::new());
        halted.shutdown();
        a.post("b", "last");

        manager
            .execute(
                &Cadence::Interval {
                    period_ms: 1,
                },
                &[halted],
            )
            .await
            .unwrap();
        assert_eq!(read(&b.mailbox).in_count(), 1);
    }
}
