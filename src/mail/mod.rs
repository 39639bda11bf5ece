//! Mail routing layer: typed mail, per-actor mailboxes and the manager that
//! moves mail between them.

mod mail;
mod mailbox;
mod manager;

pub use mail::{ActorId, ConditionCheck, ConditionVerdict, CorrelationId, Mail, MailCategory, Package, Payload, StartRequest};
pub use mailbox::Mailbox;
pub use manager::MailManager;

use crate::ShareLock;

/// Anything that owns a mailbox and can be registered with a [`MailManager`].
pub trait Actor: Send + Sync {
    fn id(&self) -> &ActorId;

    fn mailbox(&self) -> ShareLock<Mailbox>;
}
