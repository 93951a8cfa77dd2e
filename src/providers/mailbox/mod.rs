//! Mailbox ports and the file-backed mailbox.

mod snapshot;
mod traits;

pub use snapshot::SnapshotMailbox;
pub use traits::{MailboxFetch, MailboxMutation, MarkReadReport, Result, TransportError};

#[cfg(test)]
pub use traits::{MockMailboxFetch, MockMailboxMutation};
