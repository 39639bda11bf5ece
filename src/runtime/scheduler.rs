//! Tick cadence of the driving loops.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::{
    sync::Notify,
    time::{Instant, Interval, MissedTickBehavior},
};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Cadence {
    /// wake every `period_ms` milliseconds
    Interval { period_ms: u64 },
    /// wake when mail arrives, or after `idle_ms` without any
    OnMail { idle_ms: u64 },
}

impl Default for Cadence {
    fn default() -> Self {
        Cadence::Interval {
            period_ms: 5,
        }
    }
}

enum Wake {
    Interval(Interval),
    OnMail {
        notifiers: Vec<Arc<Notify>>,
        idle: Duration,
    },
}

/// Waits between two iterations of a driving loop.
pub struct Ticker {
    wake: Wake,
}

impl Ticker {
    /// `notifiers` are only used in [`Cadence::OnMail`] mode.
    pub fn new(
        cadence: &Cadence,
        notifiers: Vec<Arc<Notify>>,
    ) -> Self {
        let wake = match cadence {
            Cadence::Interval {
                period_ms,
            } => {
                let period = Duration::from_millis((*period_ms).max(1));
                let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                Wake::Interval(interval)
            }
            Cadence::OnMail {
                idle_ms,
            } => Wake::OnMail {
                notifiers,
                idle: Duration::from_millis((*idle_ms).max(1)),
            },
        };
        Self {
            wake,
        }
    }

    pub async fn tick(&mut self) {
        match &mut self.wake {
            Wake::Interval(interval) => {
                interval.tick().await;
            }
            Wake::OnMail {
                notifiers,
                idle,
            } => {
                if notifiers.is_empty() {
                    tokio::time::sleep(*idle).await;
                    return;
                }
                let any = futures::future::select_all(notifiers.iter().map(|n| Box::pin(n.notified())));
                let _ = tokio::time::timeout(*idle, any).await;
            }
        }
    }
}
