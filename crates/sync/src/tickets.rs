use std::sync::Arc;

use arc_swap::ArcSwap;
use snafu::{ResultExt, ensure};
use tether_remote::{RemoteTree, Snapshot, TreeSubscription};

use crate::decode;
use crate::error::{EmptyFieldSnafu, RemoteReadSnafu, RemoteWriteSnafu, SyncResult, UploadSnafu};
use crate::identity::Account;
use crate::ids::TicketId;
use crate::paths::{self, SyncScope};
use crate::types::{NewTicket, TicketRecord};
use crate::upload::AttachmentUploader;

/// Owns the ticket list for one signed-in account.
///
/// The in-memory list is the UI-facing collection: it is replaced wholesale
/// by every reconciliation pass and touched by exactly one optimistic
/// mutation (`close`). No other code path splices it.
pub struct TicketStore {
    tree: Arc<dyn RemoteTree>,
    uploader: AttachmentUploader,
    account: Account,
    scope: SyncScope,
    tickets: ArcSwap<Vec<TicketRecord>>,
}

impl TicketStore {
    pub fn new(tree: Arc<dyn RemoteTree>, uploader: AttachmentUploader, account: Account) -> Self {
        let scope = SyncScope::for_account(&account);
        Self {
            tree,
            uploader,
            account,
            scope,
            tickets: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Current UI-facing list; last-known-good until the next reconcile.
    pub fn tickets(&self) -> Arc<Vec<TicketRecord>> {
        self.tickets.load_full()
    }

    /// Validates, uploads attachments, and commits the ticket as one point
    /// write under the creator's own subtree.
    pub async fn create(&self, new_ticket: NewTicket) -> SyncResult<TicketRecord> {
        let reference = new_ticket.reference.trim().to_string();
        let description = new_ticket.description.trim().to_string();
        ensure!(
            !reference.is_empty(),
            EmptyFieldSnafu {
                stage: "ticket-create",
                field: "reference",
            }
        );
        ensure!(
            !description.is_empty(),
            EmptyFieldSnafu {
                stage: "ticket-create",
                field: "description",
            }
        );

        let attached_photo_urls = if new_ticket.images.is_empty() {
            None
        } else {
            let urls = self
                .uploader
                .upload_all(&new_ticket.images, |index| format!("{reference}-{index}"))
                .await
                .context(UploadSnafu {
                    stage: "ticket-create-upload",
                })?;
            Some(urls)
        };

        let record = TicketRecord {
            id: TicketId::new_v7(),
            reference,
            description,
            attached_photo_urls,
        };
        let path = paths::ticket_path(&self.account.id, record.id);
        self.tree
            .write(&path, decode::encode_ticket(&record))
            .await
            .context(RemoteWriteSnafu {
                stage: "ticket-create-write",
            })?;

        // The new ticket surfaces through the same decode path as remote
        // ones; a failed refresh only delays that, the commit already stands.
        if let Err(error) = self.fetch_all().await {
            tracing::warn!(ticket_id = %record.id, error = %error, "post-create refresh failed");
        }
        Ok(record)
    }

    /// One-shot read of the scope's subtree; full-replaces the local list.
    pub async fn fetch_all(&self) -> SyncResult<Arc<Vec<TicketRecord>>> {
        let snapshot = self
            .tree
            .read(&self.scope.ticket_base())
            .await
            .context(RemoteReadSnafu {
                stage: "ticket-fetch",
            })?;
        self.reconcile(&snapshot)
    }

    /// Registers a live listener on the scope's subtree. The returned feed
    /// must be stopped (or dropped) on every exit path.
    pub async fn observe(&self) -> SyncResult<TicketFeed<'_>> {
        let subscription = self
            .tree
            .observe(&self.scope.ticket_base())
            .await
            .context(RemoteReadSnafu {
                stage: "ticket-observe",
            })?;
        Ok(TicketFeed {
            store: self,
            subscription,
        })
    }

    /// Closes a ticket: hard delete remotely, immediate removal locally.
    ///
    /// The local removal is optimistic and is not rolled back on remote
    /// failure; the error is logged and surfaced instead of resurrecting a
    /// row the user already dismissed.
    pub async fn close(&self, ticket_id: TicketId) -> SyncResult<()> {
        self.tickets.rcu(|current| {
            current
                .iter()
                .filter(|ticket| ticket.id != ticket_id)
                .cloned()
                .collect::<Vec<_>>()
        });

        let owner = decode::resolve_ticket_owner(self.tree.as_ref(), &self.scope, ticket_id).await?;
        let path = paths::ticket_path(&owner, ticket_id);
        if let Err(error) = self.tree.remove(&path).await {
            tracing::warn!(ticket_id = %ticket_id, error = %error, "remote ticket removal failed");
            return Err(error).context(RemoteWriteSnafu {
                stage: "ticket-close-remove",
            });
        }
        Ok(())
    }

    fn reconcile(&self, snapshot: &Snapshot) -> SyncResult<Arc<Vec<TicketRecord>>> {
        // On error the previous list stays: stale-but-present beats empty.
        let decoded = decode::decode_tickets(&self.scope, snapshot)?;
        let decoded = Arc::new(decoded);
        self.tickets.store(Arc::clone(&decoded));
        Ok(decoded)
    }
}

/// Live ticket-list subscription bound to its store.
pub struct TicketFeed<'store> {
    store: &'store TicketStore,
    subscription: TreeSubscription,
}

impl TicketFeed<'_> {
    /// Waits for the next snapshot and reconciles it into the store's list.
    /// Returns `None` once the subscription is stopped.
    pub async fn next(&mut self) -> Option<SyncResult<Arc<Vec<TicketRecord>>>> {
        let snapshot = self.subscription.recv().await?;
        Some(self.store.reconcile(&snapshot))
    }

    pub fn stop(&mut self) -> bool {
        self.subscription.stop()
    }
}
