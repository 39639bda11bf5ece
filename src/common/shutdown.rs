use std::sync::atomic::{AtomicBool, Ordering};

/// One-way termination flag.
///
/// Executors flip it when they halt; the mail manager and the agent poll it
/// to know when routing can stop.
#[derive(Debug, Default)]
pub struct Shutdown {
    terminated: AtomicBool,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shutdown(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}
