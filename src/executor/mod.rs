//! Executor actors.
//!
//! Every executor interprets the mail queued in its mailbox in
//! [`Executor::forward`] and is driven by [`Executor::execute`], which calls
//! `forward` once per tick until the executor halts.

mod branch;
mod forking;
mod graph_executor;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

pub use branch::BranchExecutor;
pub use forking::BranchForkingExecutor;
pub use graph_executor::GraphExecutor;

use crate::{
    Result,
    common::{Shutdown, read},
    mail::Actor,
    runtime::{Cadence, Ticker},
};

#[async_trait]
pub trait Executor: Actor {
    fn halt_signal(&self) -> Arc<Shutdown>;

    fn is_halted(&self) -> bool {
        self.halt_signal().is_terminated()
    }

    /// Checked once before the first tick.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Interprets every queued mail. Any failure aborts the call.
    async fn forward(&self) -> Result<()>;

    /// Wakes an on-mail ticker.
    fn wakers(&self) -> Vec<Arc<Notify>> {
        vec![read(&self.mailbox()).notifier()]
    }

    async fn execute(
        &self,
        cadence: &Cadence,
    ) -> Result<()> {
        self.validate()?;
        let mut ticker = Ticker::new(cadence, self.wakers());
        while !self.is_halted() {
            self.forward().await?;
            if self.is_halted() {
                break;
            }
            ticker.tick().await;
        }
        tracing::trace!(actor = %self.id(), "executor halted");
        Ok(())
    }

    /// Responses collected by the branches this executor runs.
    fn responses(&self) -> Vec<Value> {
        Vec::new()
    }
}
