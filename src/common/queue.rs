//! Bounded queue used to journal routed mail.

use std::sync::Arc;

use crate::{MailflowError, Result};

/// Bounded MPMC (multi-producer, multi-consumer) queue.
///
/// Backed by flume. Producers inside the tick loop use [`Queue::try_send`]
/// so a full queue never suspends routing.
#[derive(Clone)]
pub struct Queue<T> {
    receiver: Arc<flume::Receiver<T>>,
    sender: Arc<flume::Sender<T>>,
}

impl<T> Queue<T> {
    /// create a new queue
    pub fn new(cap: usize) -> Arc<Self> {
        let (tx, rx) = flume::bounded(cap);

        Arc::new(Self {
            receiver: Arc::new(rx),
            sender: Arc::new(tx),
        })
    }

    /// send without waiting; fails when the queue is full
    pub fn try_send(
        &self,
        msg: T,
    ) -> Result<()> {
        self.sender.try_send(msg).map_err(|e| MailflowError::Mail(format!("journal queue: {}", e)))
    }

    /// drain everything currently queued
    pub fn drain(&self) -> Vec<T> {
        self.receiver.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}
