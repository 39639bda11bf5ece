mod context;
mod processor;
mod scheduler;
mod services;

pub use context::{Context, ContextSharing};
pub use processor::{NodeProcessor, RecordingProcessor};
pub use scheduler::{Cadence, Ticker};
pub use services::Services;
