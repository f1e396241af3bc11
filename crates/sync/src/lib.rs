//! Realtime synchronization core for the tether support product.
//!
//! Everything revolves around one remote JSON tree rooted at `accounts`.
//! Regular accounts work inside their own subtree; support accounts scan
//! the whole root and address other accounts' records by scanning for the
//! ticket's owner. Reconciliation is decode-and-full-replace: every
//! snapshot rebuilds the affected in-memory list from scratch.

pub mod chat;
pub mod decode;
pub mod error;
pub mod identity;
pub mod ids;
pub mod paths;
pub mod settings;
pub mod tickets;
pub mod types;
pub mod upload;

pub use chat::{ChatSync, MessageFeed, SendPhase};
pub use error::{SyncError, SyncResult};
pub use identity::{Account, IdentityProvider, Role, StaticIdentity};
pub use ids::{AccountId, MessageId, TicketId};
pub use paths::SyncScope;
pub use settings::{SettingsStore, SyncSettings};
pub use tickets::{TicketFeed, TicketStore};
pub use types::{MessageDraft, MessageRecord, NewTicket, TicketRecord};
pub use upload::{AttachmentError, AttachmentUploader};

#[cfg(test)]
pub(crate) mod testutil;
