use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use snafu::{ResultExt, ensure};
use tether_remote::{RemoteTree, Snapshot, TreeSubscription};

use crate::decode;
use crate::error::{EmptyDraftSnafu, RemoteReadSnafu, RemoteWriteSnafu, SyncResult, UploadSnafu};
use crate::identity::Account;
use crate::ids::{MessageId, TicketId};
use crate::paths::{self, SyncScope};
use crate::types::{MessageDraft, MessageRecord};
use crate::upload::AttachmentUploader;

/// Where a send currently is. Every exit path of [`ChatSync::send`] lands
/// back on `Idle`, success and failure alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPhase {
    Idle,
    Uploading,
    Committing,
}

/// Realtime sync for one ticket's conversation.
///
/// A regular account reads and writes its own `messages` subtree directly.
/// A support account has no path of its own: every send re-scans the
/// accounts tree for the current owner of the ticket id, and observation
/// watches the whole tree with the decode routine narrowing to this ticket.
pub struct ChatSync {
    tree: Arc<dyn RemoteTree>,
    uploader: AttachmentUploader,
    account: Account,
    scope: SyncScope,
    ticket_id: TicketId,
    messages: ArcSwap<Vec<MessageRecord>>,
    draft: Mutex<MessageDraft>,
    phase: Mutex<SendPhase>,
}

impl ChatSync {
    pub fn new(
        tree: Arc<dyn RemoteTree>,
        uploader: AttachmentUploader,
        account: Account,
        ticket_id: TicketId,
    ) -> Self {
        let scope = SyncScope::for_account(&account);
        Self {
            tree,
            uploader,
            account,
            scope,
            ticket_id,
            messages: ArcSwap::from_pointee(Vec::new()),
            draft: Mutex::new(MessageDraft::default()),
            phase: Mutex::new(SendPhase::Idle),
        }
    }

    pub fn ticket_id(&self) -> TicketId {
        self.ticket_id
    }

    /// Current conversation in timeline order; last-known-good until the
    /// next reconcile.
    pub fn messages(&self) -> Arc<Vec<MessageRecord>> {
        self.messages.load_full()
    }

    pub fn send_phase(&self) -> SendPhase {
        *lock(&self.phase)
    }

    pub fn draft(&self) -> MessageDraft {
        lock(&self.draft).clone()
    }

    pub fn set_draft_text(&self, text: impl Into<String>) {
        lock(&self.draft).text = text.into();
    }

    pub fn push_draft_image(&self, bytes: Vec<u8>) {
        lock(&self.draft).images.push(bytes);
    }

    /// Sends the pending draft: upload attachments, then one point write.
    ///
    /// The draft is cleared only after the commit succeeded, so any failure
    /// leaves the input editable for retry. Already-uploaded attachments of
    /// a failed send stay orphaned in storage, unreferenced by any record.
    pub async fn send(&self) -> SyncResult<MessageRecord> {
        let draft = lock(&self.draft).clone();
        ensure!(!draft.is_empty(), EmptyDraftSnafu { stage: "chat-send" });

        let result = self.run_send(&draft).await;
        *lock(&self.phase) = SendPhase::Idle;

        let record = result?;
        *lock(&self.draft) = MessageDraft::default();

        // The sent message surfaces through the same decode path as remote
        // ones; a failed refresh only delays that, the commit already stands.
        if let Err(error) = self.fetch_all().await {
            tracing::warn!(ticket_id = %self.ticket_id, error = %error, "post-send refresh failed");
        }
        Ok(record)
    }

    async fn run_send(&self, draft: &MessageDraft) -> SyncResult<MessageRecord> {
        // The id is minted before upload so attachment keys can embed it.
        let message_id = MessageId::new_v7();

        let attached_image_urls = if draft.images.is_empty() {
            None
        } else {
            *lock(&self.phase) = SendPhase::Uploading;
            let ticket_id = self.ticket_id;
            let urls = self
                .uploader
                .upload_all(&draft.images, |index| {
                    format!("{ticket_id}/{message_id}/{index}")
                })
                .await
                .context(UploadSnafu {
                    stage: "chat-send-upload",
                })?;
            Some(urls)
        };

        *lock(&self.phase) = SendPhase::Committing;
        let owner =
            decode::resolve_ticket_owner(self.tree.as_ref(), &self.scope, self.ticket_id).await?;

        let record = MessageRecord {
            id: message_id,
            text: draft.text.trim().to_string(),
            timestamp_ms: now_ms(),
            attached_image_urls,
            // Stamped from the sender's own role, never inferred later.
            is_from_support: self.account.role.is_support(),
        };
        let path = paths::message_path(&owner, self.ticket_id, message_id);
        self.tree
            .write(&path, decode::encode_message(&record))
            .await
            .context(RemoteWriteSnafu {
                stage: "chat-send-commit",
            })?;
        Ok(record)
    }

    /// One-shot read of the conversation; full-replaces the local list.
    pub async fn fetch_all(&self) -> SyncResult<Arc<Vec<MessageRecord>>> {
        let snapshot = self
            .tree
            .read(&self.scope.message_base(self.ticket_id))
            .await
            .context(RemoteReadSnafu {
                stage: "chat-fetch",
            })?;
        self.reconcile(&snapshot)
    }

    /// Live listener for the conversation. The feed must be stopped (or
    /// dropped) on every exit path, including error exits.
    pub async fn observe(&self) -> SyncResult<MessageFeed<'_>> {
        let subscription = self
            .tree
            .observe(&self.scope.message_base(self.ticket_id))
            .await
            .context(RemoteReadSnafu {
                stage: "chat-observe",
            })?;
        Ok(MessageFeed {
            chat: self,
            subscription,
        })
    }

    fn reconcile(&self, snapshot: &Snapshot) -> SyncResult<Arc<Vec<MessageRecord>>> {
        // On error the previous list stays: stale-but-present beats empty.
        let decoded = decode::decode_messages(&self.scope, self.ticket_id, snapshot)?;
        let decoded = Arc::new(decoded);
        self.messages.store(Arc::clone(&decoded));
        Ok(decoded)
    }
}

/// Live conversation subscription bound to its [`ChatSync`].
pub struct MessageFeed<'chat> {
    chat: &'chat ChatSync,
    subscription: TreeSubscription,
}

impl MessageFeed<'_> {
    /// Waits for the next snapshot and reconciles it into the conversation.
    /// Returns `None` once the subscription is stopped.
    pub async fn next(&mut self) -> Option<SyncResult<Arc<Vec<MessageRecord>>>> {
        let snapshot = self.subscription.recv().await?;
        Some(self.chat.reconcile(&snapshot))
    }

    pub fn stop(&mut self) -> bool {
        self.subscription.stop()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::identity::Role;
    use crate::ids::AccountId;
    use crate::testutil::{blob_store, memory_tree, sample_image, seed_ticket, uploader_for};
    use serde_json::Value;

    fn chat_for(
        tree: &Arc<tether_remote::MemoryTree>,
        account: Account,
        ticket_id: TicketId,
    ) -> ChatSync {
        ChatSync::new(
            Arc::clone(tree) as Arc<dyn RemoteTree>,
            uploader_for(&blob_store()),
            account,
            ticket_id,
        )
    }

    fn regular() -> Account {
        Account::new(AccountId::from("u1"), Role::Regular)
    }

    fn support() -> Account {
        Account::new(AccountId::from("s1"), Role::Support)
    }

    #[tokio::test]
    async fn empty_draft_is_rejected_before_any_side_effect() {
        let tree = memory_tree();
        let ticket_id = seed_ticket(&tree, "u1").await;
        let chat = chat_for(&tree, regular(), ticket_id);
        chat.set_draft_text("   ");

        let error = chat.send().await.unwrap_err();
        assert!(matches!(error, SyncError::EmptyDraft { .. }));
        assert_eq!(chat.send_phase(), SendPhase::Idle);

        let messages = tree
            .read(&paths::ticket_messages(&AccountId::from("u1"), ticket_id))
            .await
            .unwrap();
        assert_eq!(messages, Value::Null);
    }

    #[tokio::test]
    async fn successful_send_commits_clears_the_draft_and_refreshes() {
        let tree = memory_tree();
        let ticket_id = seed_ticket(&tree, "u1").await;
        let chat = chat_for(&tree, regular(), ticket_id);

        chat.set_draft_text("hello there");
        let sent = chat.send().await.unwrap();

        assert!(!sent.is_from_support);
        assert!(chat.draft().is_empty());
        assert_eq!(chat.send_phase(), SendPhase::Idle);
        // The post-send refresh populated the list through the decode path.
        assert_eq!(chat.messages().as_slice(), &[sent]);
    }

    #[tokio::test]
    async fn support_send_lands_in_the_owning_accounts_subtree() {
        let tree = memory_tree();
        let ticket_id = seed_ticket(&tree, "u1").await;
        let chat = chat_for(&tree, support(), ticket_id);

        chat.set_draft_text("support here");
        let sent = chat.send().await.unwrap();
        assert!(sent.is_from_support);

        let raw = tree
            .read(&paths::message_path(
                &AccountId::from("u1"),
                ticket_id,
                sent.id,
            ))
            .await
            .unwrap();
        assert_eq!(raw.get("isFromSupport"), Some(&Value::Bool(true)));
    }

    #[tokio::test]
    async fn support_send_fails_when_no_account_holds_the_ticket() {
        let tree = memory_tree();
        seed_ticket(&tree, "u1").await;
        let chat = chat_for(&tree, support(), TicketId::new_v7());

        chat.set_draft_text("orphan");
        let error = chat.send().await.unwrap_err();
        assert!(matches!(error, SyncError::TicketOwnerNotFound { .. }));
        assert_eq!(chat.send_phase(), SendPhase::Idle);
    }

    #[tokio::test]
    async fn failed_upload_aborts_the_send_and_keeps_the_draft() {
        let tree = memory_tree();
        let ticket_id = seed_ticket(&tree, "u1").await;
        let blobs = blob_store();
        blobs.fail_nth_store(2);
        let chat = ChatSync::new(
            Arc::clone(&tree) as Arc<dyn RemoteTree>,
            uploader_for(&blobs),
            regular(),
            ticket_id,
        );

        chat.set_draft_text("two images");
        chat.push_draft_image(sample_image());
        chat.push_draft_image(sample_image());

        let error = chat.send().await.unwrap_err();
        assert!(matches!(error, SyncError::Upload { .. }));
        assert_eq!(chat.send_phase(), SendPhase::Idle);

        // Image 1 is orphaned in storage but no record references it.
        assert_eq!(blobs.object_count(), 1);
        let messages = tree
            .read(&paths::ticket_messages(&AccountId::from("u1"), ticket_id))
            .await
            .unwrap();
        assert_eq!(messages, Value::Null);

        // The draft survives for a retry without retyping.
        assert_eq!(chat.draft().text, "two images");
        assert_eq!(chat.draft().images.len(), 2);
    }

    #[tokio::test]
    async fn failed_commit_keeps_the_draft_and_the_previous_list() {
        let tree = memory_tree();
        let ticket_id = seed_ticket(&tree, "u1").await;
        let chat = chat_for(&tree, regular(), ticket_id);

        chat.set_draft_text("first");
        chat.send().await.unwrap();
        let before = chat.messages();

        chat.set_draft_text("second");
        tree.fail_next_write();
        let error = chat.send().await.unwrap_err();

        assert!(matches!(error, SyncError::RemoteWrite { .. }));
        assert_eq!(chat.draft().text, "second");
        assert_eq!(chat.messages(), before);
        assert_eq!(chat.send_phase(), SendPhase::Idle);
    }

    #[tokio::test]
    async fn both_roles_observe_the_same_conversation() {
        let tree = memory_tree();
        let ticket_id = seed_ticket(&tree, "u1").await;
        let regular_chat = chat_for(&tree, regular(), ticket_id);
        let support_chat = chat_for(&tree, support(), ticket_id);

        let mut regular_feed = regular_chat.observe().await.unwrap();
        let mut support_feed = support_chat.observe().await.unwrap();
        let _ = regular_feed.next().await;
        let _ = support_feed.next().await;

        regular_chat.set_draft_text("from user");
        regular_chat.send().await.unwrap();

        let seen_by_regular = regular_feed.next().await.unwrap().unwrap();
        let seen_by_support = support_feed.next().await.unwrap().unwrap();
        assert_eq!(seen_by_regular, seen_by_support);
        assert_eq!(seen_by_regular[0].text, "from user");

        regular_feed.stop();
        support_feed.stop();
        assert_eq!(tree.watcher_count(), 0);
    }

    #[tokio::test]
    async fn read_failure_leaves_the_previous_list_untouched() {
        let tree = memory_tree();
        let ticket_id = seed_ticket(&tree, "u1").await;
        let chat = chat_for(&tree, regular(), ticket_id);

        chat.set_draft_text("kept");
        chat.send().await.unwrap();
        let before = chat.messages();
        assert_eq!(before.len(), 1);

        tree.fail_next_read();
        assert!(chat.fetch_all().await.is_err());
        assert_eq!(chat.messages(), before);
    }
}
