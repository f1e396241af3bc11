use crate::ids::{MessageId, TicketId};

/// A support ticket as surfaced to the UI. The id doubles as the record's
/// path segment in the remote tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketRecord {
    pub id: TicketId,
    pub reference: String,
    pub description: String,
    pub attached_photo_urls: Option<Vec<String>>,
}

/// Input to [`crate::tickets::TicketStore::create`]; images are raw bytes,
/// compressed and uploaded before the record is committed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewTicket {
    pub reference: String,
    pub description: String,
    pub images: Vec<Vec<u8>>,
}

impl NewTicket {
    pub fn new(reference: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            description: description.into(),
            images: Vec::new(),
        }
    }
}

/// A chat message. Persisted once, never mutated or deleted by this core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub text: String,
    /// Client-generated epoch milliseconds; ordering is re-derived from this
    /// on every decode, never from commit order.
    pub timestamp_ms: i64,
    pub attached_image_urls: Option<Vec<String>>,
    pub is_from_support: bool,
}

/// Pending user input for one conversation. Cleared only after a successful
/// commit, so failed sends stay editable for retry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageDraft {
    pub text: String,
    pub images: Vec<Vec<u8>>,
}

impl MessageDraft {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.images.is_empty()
    }
}
