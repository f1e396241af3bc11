use std::cmp::Ordering;

use serde::Deserialize;
use serde_json::{Map, Value};
use snafu::{OptionExt, ResultExt};
use tether_remote::{RemoteTree, Snapshot};

use crate::error::{
    MalformedSnapshotSnafu, RemoteReadSnafu, SyncResult, TicketOwnerNotFoundSnafu,
};
use crate::ids::{AccountId, MessageId, TicketId};
use crate::paths::{self, SyncScope};
use crate::types::{MessageRecord, TicketRecord};

// Wire shapes of one tree child. The entity id is the child's key, never a
// payload field.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TicketWire {
    reference: String,
    description: String,
    #[serde(default)]
    attached_photo_urls: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageWire {
    text: String,
    timestamp_ms: i64,
    #[serde(default)]
    attached_image_urls: Option<Vec<String>>,
    is_from_support: bool,
}

/// Builds the wire value committed for a ticket record.
pub fn encode_ticket(record: &TicketRecord) -> Snapshot {
    let mut map = Map::new();
    map.insert("reference".into(), Value::String(record.reference.clone()));
    map.insert(
        "description".into(),
        Value::String(record.description.clone()),
    );
    if let Some(urls) = &record.attached_photo_urls {
        map.insert("attachedPhotoUrls".into(), urls_value(urls));
    }
    Value::Object(map)
}

/// Builds the wire value committed for a message record.
pub fn encode_message(record: &MessageRecord) -> Snapshot {
    let mut map = Map::new();
    map.insert("text".into(), Value::String(record.text.clone()));
    map.insert("timestampMs".into(), Value::from(record.timestamp_ms));
    map.insert("isFromSupport".into(), Value::Bool(record.is_from_support));
    if let Some(urls) = &record.attached_image_urls {
        map.insert("attachedImageUrls".into(), urls_value(urls));
    }
    Value::Object(map)
}

fn urls_value(urls: &[String]) -> Value {
    Value::Array(urls.iter().cloned().map(Value::String).collect())
}

/// Decodes a ticket-collection snapshot for the given scope.
///
/// `Own` snapshots are a flat `id -> record` mapping; `AllAccounts`
/// snapshots are `accountId -> { tickets: { id -> record } }` and every
/// account's tickets are flattened into one list. Malformed children are
/// skipped with a warning; only a wrong-shaped root is an error.
pub fn decode_tickets(scope: &SyncScope, snapshot: &Snapshot) -> SyncResult<Vec<TicketRecord>> {
    match scope {
        SyncScope::Own(_) => {
            let Some(children) = collection_children(snapshot, "tickets")? else {
                return Ok(Vec::new());
            };
            Ok(decode_ticket_children(children))
        }
        SyncScope::AllAccounts => {
            let Some(accounts) = collection_children(snapshot, "accounts")? else {
                return Ok(Vec::new());
            };
            let mut all = Vec::new();
            for (account_id, account_node) in accounts {
                if let Some(children) = subtree_children(account_node, &[paths::TICKETS], account_id)
                {
                    all.extend(decode_ticket_children(children));
                }
            }
            Ok(all)
        }
    }
}

/// Decodes a message snapshot for one ticket's conversation and sorts it
/// into timeline order.
///
/// `Own` snapshots are the ticket's `messages` mapping directly;
/// `AllAccounts` snapshots are the whole accounts tree, narrowed here to
/// the observed ticket id.
pub fn decode_messages(
    scope: &SyncScope,
    ticket_id: TicketId,
    snapshot: &Snapshot,
) -> SyncResult<Vec<MessageRecord>> {
    let mut messages = match scope {
        SyncScope::Own(_) => {
            let Some(children) = collection_children(snapshot, "messages")? else {
                return Ok(Vec::new());
            };
            decode_message_children(children)
        }
        SyncScope::AllAccounts => {
            let Some(accounts) = collection_children(snapshot, "accounts")? else {
                return Ok(Vec::new());
            };
            let ticket_key = ticket_id.to_string();
            let mut all = Vec::new();
            for (account_id, account_node) in accounts {
                let segments = [paths::TICKETS, ticket_key.as_str(), paths::MESSAGES];
                if let Some(children) = subtree_children(account_node, &segments, account_id) {
                    all.extend(decode_message_children(children));
                }
            }
            all
        }
    };

    // Client clocks race across writers; order is a read-path property.
    messages.sort_by(timeline_order);
    Ok(messages)
}

/// Locates which account's subtree currently holds the ticket. Support-role
/// writes and closes re-run this scan on every operation; ownership is
/// never cached.
pub fn find_ticket_owner(accounts_snapshot: &Snapshot, ticket_id: TicketId) -> Option<AccountId> {
    let accounts = accounts_snapshot.as_object()?;
    let ticket_key = ticket_id.to_string();
    for (account_id, account_node) in accounts {
        let held = account_node
            .get(paths::TICKETS)
            .and_then(|tickets| tickets.get(&ticket_key))
            .is_some();
        if held {
            return Some(AccountId::new(account_id.clone()));
        }
    }
    None
}

/// Resolves the remote owner of a ticket for the given scope: self for a
/// regular account, the accounts-root scan for support.
pub async fn resolve_ticket_owner(
    tree: &dyn RemoteTree,
    scope: &SyncScope,
    ticket_id: TicketId,
) -> SyncResult<AccountId> {
    match scope {
        SyncScope::Own(account_id) => Ok(account_id.clone()),
        SyncScope::AllAccounts => {
            let snapshot = tree
                .read(&paths::accounts_root())
                .await
                .context(RemoteReadSnafu {
                    stage: "ticket-owner-scan",
                })?;
            find_ticket_owner(&snapshot, ticket_id).context(TicketOwnerNotFoundSnafu {
                stage: "ticket-owner-scan",
                ticket_id,
            })
        }
    }
}

fn timeline_order(left: &MessageRecord, right: &MessageRecord) -> Ordering {
    left.timestamp_ms
        .cmp(&right.timestamp_ms)
        .then_with(|| left.id.cmp(&right.id))
}

/// A collection root is an object, or `Null` when nothing was written yet.
/// Anything else means the snapshot itself is unusable.
fn collection_children<'snapshot>(
    snapshot: &'snapshot Snapshot,
    what: &'static str,
) -> SyncResult<Option<&'snapshot Map<String, Value>>> {
    match snapshot {
        Value::Null => Ok(None),
        Value::Object(children) => Ok(Some(children)),
        other => MalformedSnapshotSnafu {
            stage: "decode-collection-root",
            details: format!("{what} node is {}", value_kind(other)),
        }
        .fail(),
    }
}

/// Walks `segments` below one account node, yielding the child map at the
/// end of the chain. A malformed intermediate skips the account (warned),
/// an absent one is simply empty.
fn subtree_children<'node>(
    account_node: &'node Value,
    segments: &[&str],
    account_id: &str,
) -> Option<&'node Map<String, Value>> {
    let mut node = account_node;
    for segment in segments {
        node = match node.get(segment) {
            Some(child) => child,
            None => return None,
        };
    }
    match node {
        Value::Object(children) => Some(children),
        Value::Null => None,
        other => {
            tracing::warn!(
                account_id,
                kind = value_kind(other),
                "skipping account subtree with malformed collection node"
            );
            None
        }
    }
}

fn decode_ticket_children(children: &Map<String, Value>) -> Vec<TicketRecord> {
    children
        .iter()
        .filter_map(|(key, value)| decode_ticket(key, value))
        .collect()
}

fn decode_message_children(children: &Map<String, Value>) -> Vec<MessageRecord> {
    children
        .iter()
        .filter_map(|(key, value)| decode_message(key, value))
        .collect()
}

fn decode_ticket(key: &str, value: &Value) -> Option<TicketRecord> {
    let id = match TicketId::parse(key) {
        Ok(id) => id,
        Err(error) => {
            tracing::warn!(key, error = %error, "skipping ticket with malformed key");
            return None;
        }
    };
    match serde_json::from_value::<TicketWire>(value.clone()) {
        Ok(wire) => Some(TicketRecord {
            id,
            reference: wire.reference,
            description: wire.description,
            attached_photo_urls: wire.attached_photo_urls,
        }),
        Err(error) => {
            tracing::warn!(key, error = %error, "skipping malformed ticket record");
            None
        }
    }
}

fn decode_message(key: &str, value: &Value) -> Option<MessageRecord> {
    let id = match MessageId::parse(key) {
        Ok(id) => id,
        Err(error) => {
            tracing::warn!(key, error = %error, "skipping message with malformed key");
            return None;
        }
    };
    match serde_json::from_value::<MessageWire>(value.clone()) {
        Ok(wire) => Some(MessageRecord {
            id,
            text: wire.text,
            timestamp_ms: wire.timestamp_ms,
            attached_image_urls: wire.attached_image_urls,
            is_from_support: wire.is_from_support,
        }),
        Err(error) => {
            tracing::warn!(key, error = %error, "skipping malformed message record");
            None
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use serde_json::json;

    fn id(n: u8) -> String {
        format!("00000000-0000-7000-8000-0000000000{n:02x}")
    }

    fn own_scope() -> SyncScope {
        SyncScope::Own(AccountId::from("u1"))
    }

    fn message(key: &str, timestamp_ms: i64) -> Value {
        let _ = key;
        json!({ "text": "hello", "timestampMs": timestamp_ms, "isFromSupport": false })
    }

    #[test]
    fn messages_sort_by_timestamp_regardless_of_key_order() {
        let snapshot = json!({
            id(1): message(&id(1), 300),
            id(2): message(&id(2), 100),
            id(3): message(&id(3), 200),
        });

        let decoded = decode_messages(&own_scope(), TicketId::new_v7(), &snapshot).unwrap();
        let timestamps: Vec<i64> = decoded.iter().map(|m| m.timestamp_ms).collect();
        assert_eq!(timestamps, vec![100, 200, 300]);
    }

    #[test]
    fn equal_timestamps_break_ties_by_id() {
        let snapshot = json!({
            id(2): message(&id(2), 500),
            id(1): message(&id(1), 500),
        });

        let decoded = decode_messages(&own_scope(), TicketId::new_v7(), &snapshot).unwrap();
        assert_eq!(decoded[0].id, MessageId::parse(&id(1)).unwrap());
        assert_eq!(decoded[1].id, MessageId::parse(&id(2)).unwrap());
    }

    #[test]
    fn malformed_children_are_skipped_without_poisoning_the_batch() {
        let snapshot = json!({
            "not-a-uuid": message("x", 100),
            id(1): { "text": "missing timestamp", "isFromSupport": false },
            id(2): message(&id(2), 200),
        });

        let decoded = decode_messages(&own_scope(), TicketId::new_v7(), &snapshot).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].id, MessageId::parse(&id(2)).unwrap());
    }

    #[test]
    fn support_scope_flattens_every_accounts_tickets() {
        let scope = SyncScope::AllAccounts;
        let snapshot = json!({
            "u1": { "tickets": { id(1): { "reference": "R1", "description": "D1" } } },
            "u2": {
                "isSupport": false,
                "tickets": { id(2): { "reference": "R2", "description": "D2" } },
            },
            "s1": { "isSupport": true },
        });

        let decoded = decode_tickets(&scope, &snapshot).unwrap();
        let references: Vec<&str> = decoded.iter().map(|t| t.reference.as_str()).collect();
        assert_eq!(references, vec!["R1", "R2"]);
    }

    #[test]
    fn support_message_decode_narrows_to_the_observed_ticket() {
        let ticket = TicketId::parse(&id(1)).unwrap();
        let snapshot = json!({
            "u1": { "tickets": { id(1): { "messages": { id(3): message(&id(3), 100) } } } },
            "u2": { "tickets": { id(2): { "messages": { id(4): message(&id(4), 50) } } } },
        });

        let decoded = decode_messages(&SyncScope::AllAccounts, ticket, &snapshot).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].id, MessageId::parse(&id(3)).unwrap());
    }

    #[test]
    fn decode_is_idempotent_over_the_same_snapshot() {
        let snapshot = json!({
            id(2): message(&id(2), 100),
            id(1): message(&id(1), 100),
            id(3): message(&id(3), 40),
        });
        let ticket_id = TicketId::new_v7();

        let first = decode_messages(&own_scope(), ticket_id, &snapshot).unwrap();
        let second = decode_messages(&own_scope(), ticket_id, &snapshot).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn absent_collections_decode_to_empty_lists() {
        assert!(decode_tickets(&own_scope(), &Value::Null).unwrap().is_empty());
        assert!(
            decode_messages(&own_scope(), TicketId::new_v7(), &Value::Null)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn scalar_collection_roots_are_rejected() {
        let error = decode_tickets(&own_scope(), &json!("garbage")).unwrap_err();
        assert!(matches!(error, SyncError::MalformedSnapshot { .. }));
    }

    #[test]
    fn owner_scan_matches_by_ticket_id() {
        let wanted = TicketId::parse(&id(7)).unwrap();
        let snapshot = json!({
            "u1": { "tickets": { id(1): { "reference": "R", "description": "D" } } },
            "u2": { "tickets": { id(7): { "reference": "R", "description": "D" } } },
        });

        assert_eq!(
            find_ticket_owner(&snapshot, wanted),
            Some(AccountId::from("u2"))
        );
        assert_eq!(
            find_ticket_owner(&snapshot, TicketId::parse(&id(9)).unwrap()),
            None
        );
    }

    #[test]
    fn ticket_decode_round_trips_through_the_wire_shape() {
        let record = TicketRecord {
            id: TicketId::parse(&id(1)).unwrap(),
            reference: "R1".into(),
            description: "D1".into(),
            attached_photo_urls: Some(vec!["memory://a".into()]),
        };

        let decoded = decode_ticket(&record.id.to_string(), &encode_ticket(&record)).unwrap();
        assert_eq!(decoded, record);
    }
}
