mod cache;
mod lock;
mod queue;
mod shutdown;
mod vars;

pub use cache::MemCache;
pub(crate) use lock::{read, write};
pub use queue::Queue;
pub use shutdown::Shutdown;
pub use vars::Vars;
