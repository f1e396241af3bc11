use std::env;
use std::io::Cursor;
use std::sync::Arc;

use serde_json::{Value, json};
use snafu::{OptionExt, ResultExt, Snafu};
use tether_remote::{BlobStore, MemoryBlobStore, MemoryTree, RemoteError, RemoteTree};

use tether_sync::{
    Account, AccountId, AttachmentUploader, ChatSync, MessageId, MessageRecord, NewTicket, Role,
    SendPhase, SyncError, SyncScope, TicketId, TicketRecord, TicketStore, decode, paths,
};

#[derive(Debug, Clone)]
struct RunnerArgs {
    scenario: Scenario,
}

#[derive(Debug, Clone, Copy)]
enum Scenario {
    TicketCreateRoundtrip,
    TicketCloseOptimistic,
    MessageOrder,
    MessageTieBreak,
    MalformedChildSkip,
    EmptyDraftRejected,
    SupportCrossWrite,
    UploadAbort,
    DecodeIdempotent,
    All,
}

impl Scenario {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ticket_create_roundtrip" => Some(Self::TicketCreateRoundtrip),
            "ticket_close_optimistic" => Some(Self::TicketCloseOptimistic),
            "message_order" => Some(Self::MessageOrder),
            "message_tie_break" => Some(Self::MessageTieBreak),
            "malformed_child_skip" => Some(Self::MalformedChildSkip),
            "empty_draft_rejected" => Some(Self::EmptyDraftRejected),
            "support_cross_write" => Some(Self::SupportCrossWrite),
            "upload_abort" => Some(Self::UploadAbort),
            "decode_idempotent" => Some(Self::DecodeIdempotent),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::TicketCreateRoundtrip => "ticket_create_roundtrip",
            Self::TicketCloseOptimistic => "ticket_close_optimistic",
            Self::MessageOrder => "message_order",
            Self::MessageTieBreak => "message_tie_break",
            Self::MalformedChildSkip => "malformed_child_skip",
            Self::EmptyDraftRejected => "empty_draft_rejected",
            Self::SupportCrossWrite => "support_cross_write",
            Self::UploadAbort => "upload_abort",
            Self::DecodeIdempotent => "decode_idempotent",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Snafu)]
enum RunnerError {
    #[snafu(display("missing required --scenario argument"))]
    MissingScenario { stage: &'static str },
    #[snafu(display("missing value for argument '{arg}'"))]
    MissingArgumentValue {
        stage: &'static str,
        arg: &'static str,
    },
    #[snafu(display("unknown scenario '{raw}'"))]
    UnknownScenario { stage: &'static str, raw: String },
    #[snafu(display("unknown argument '{raw}'"))]
    UnknownArgument { stage: &'static str, raw: String },
    #[snafu(display("sync validation failed: {source}"))]
    SyncValidation {
        stage: &'static str,
        source: SyncError,
    },
    #[snafu(display("remote access failed: {source}"))]
    RemoteAccess {
        stage: &'static str,
        source: RemoteError,
    },
    #[snafu(display("scenario '{scenario}' failed: {reason}"))]
    ScenarioFailed {
        stage: &'static str,
        scenario: &'static str,
        reason: String,
    },
}

type RunnerResult<T> = Result<T, RunnerError>;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(error) = run().await {
        println!("runner_ok=false");
        eprintln!("runner_error={error}");
        std::process::exit(1);
    }
}

async fn run() -> RunnerResult<()> {
    let args = parse_args(env::args().skip(1))?;
    println!("scenario={}", args.scenario.name());

    match args.scenario {
        Scenario::TicketCreateRoundtrip => run_ticket_create_roundtrip().await,
        Scenario::TicketCloseOptimistic => run_ticket_close_optimistic().await,
        Scenario::MessageOrder => run_message_order().await,
        Scenario::MessageTieBreak => run_message_tie_break().await,
        Scenario::MalformedChildSkip => run_malformed_child_skip().await,
        Scenario::EmptyDraftRejected => run_empty_draft_rejected().await,
        Scenario::SupportCrossWrite => run_support_cross_write().await,
        Scenario::UploadAbort => run_upload_abort().await,
        Scenario::DecodeIdempotent => run_decode_idempotent().await,
        Scenario::All => run_all().await,
    }
}

fn parse_args(args: impl IntoIterator<Item = String>) -> RunnerResult<RunnerArgs> {
    let mut scenario = None;
    let mut pending = args.into_iter();

    // The parser is intentionally strict to keep scenario execution deterministic in CI.
    while let Some(argument) = pending.next() {
        match argument.as_str() {
            "--scenario" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-scenario-value",
                    arg: "--scenario",
                })?;

                let parsed = Scenario::parse(&value).context(UnknownScenarioSnafu {
                    stage: "parse-args-scenario",
                    raw: value,
                })?;
                scenario = Some(parsed);
            }
            _ => {
                return UnknownArgumentSnafu {
                    stage: "parse-args",
                    raw: argument,
                }
                .fail();
            }
        }
    }

    Ok(RunnerArgs {
        scenario: scenario.context(MissingScenarioSnafu {
            stage: "parse-args-scenario-required",
        })?,
    })
}

async fn run_all() -> RunnerResult<()> {
    run_ticket_create_roundtrip().await?;
    run_ticket_close_optimistic().await?;
    run_message_order().await?;
    run_message_tie_break().await?;
    run_malformed_child_skip().await?;
    run_empty_draft_rejected().await?;
    run_support_cross_write().await?;
    run_upload_abort().await?;
    run_decode_idempotent().await?;

    println!("all_passed=true");
    Ok(())
}

async fn run_ticket_create_roundtrip() -> RunnerResult<()> {
    let tree = memory_tree();
    let store = regular_store(&tree, "u1");

    let created = store
        .create(NewTicket::new("R1", "issue with login"))
        .await
        .context(SyncValidationSnafu {
            stage: "scenario-ticket-create",
        })?;

    let listed = store.fetch_all().await.context(SyncValidationSnafu {
        stage: "scenario-ticket-create-fetch",
    })?;
    ensure_scenario(
        listed.as_slice() == [created.clone()],
        "ticket_create_roundtrip",
        "fetched list does not equal the created record",
    )?;

    println!("ticket_roundtrip=true");
    println!("runner_ok=true");
    Ok(())
}

async fn run_ticket_close_optimistic() -> RunnerResult<()> {
    let tree = memory_tree();
    let store = regular_store(&tree, "u1");
    let created = store
        .create(NewTicket::new("R1", "D1"))
        .await
        .context(SyncValidationSnafu {
            stage: "scenario-ticket-close-create",
        })?;

    tree.fail_next_write();
    let close_failed = store.close(created.id).await.is_err();
    ensure_scenario(
        close_failed,
        "ticket_close_optimistic",
        "close did not surface the injected remote failure",
    )?;
    ensure_scenario(
        store.tickets().is_empty(),
        "ticket_close_optimistic",
        "local list still holds the closed ticket",
    )?;

    let remote = tree
        .read(&paths::ticket_path(&AccountId::from("u1"), created.id))
        .await
        .context(RemoteAccessSnafu {
            stage: "scenario-ticket-close-read",
        })?;
    ensure_scenario(
        remote != Value::Null,
        "ticket_close_optimistic",
        "remote record vanished despite the failed remove",
    )?;

    println!("close_optimistic=true");
    println!("runner_ok=true");
    Ok(())
}

async fn run_message_order() -> RunnerResult<()> {
    let tree = memory_tree();
    let (ticket_id, chat) = seeded_chat(&tree, "u1", Role::Regular).await?;

    // Commit out of timeline order; the decode pass must re-sort.
    seed_message(&tree, "u1", ticket_id, MessageId::new_v7(), "later", 2_000).await?;
    seed_message(&tree, "u1", ticket_id, MessageId::new_v7(), "earlier", 1_000).await?;

    let messages = chat.fetch_all().await.context(SyncValidationSnafu {
        stage: "scenario-message-order-fetch",
    })?;
    let texts: Vec<&str> = messages.iter().map(|message| message.text.as_str()).collect();
    ensure_scenario(
        texts == ["earlier", "later"],
        "message_order",
        "conversation is not sorted by timestamp",
    )?;

    println!("message_order=true");
    println!("runner_ok=true");
    Ok(())
}

async fn run_message_tie_break() -> RunnerResult<()> {
    let tree = memory_tree();
    let (ticket_id, chat) = seeded_chat(&tree, "u1", Role::Regular).await?;

    let low = parse_message_id("00000000-0000-7000-8000-000000000001")?;
    let high = parse_message_id("00000000-0000-7000-8000-000000000002")?;
    seed_message(&tree, "u1", ticket_id, high, "second", 1_000).await?;
    seed_message(&tree, "u1", ticket_id, low, "first", 1_000).await?;

    let messages = chat.fetch_all().await.context(SyncValidationSnafu {
        stage: "scenario-message-tie-break-fetch",
    })?;
    let ids: Vec<MessageId> = messages.iter().map(|message| message.id).collect();
    ensure_scenario(
        ids == [low, high],
        "message_tie_break",
        "equal timestamps are not ordered by id",
    )?;

    println!("message_tie_break=true");
    println!("runner_ok=true");
    Ok(())
}

async fn run_malformed_child_skip() -> RunnerResult<()> {
    let tree = memory_tree();
    let store = regular_store(&tree, "u1");
    let created = store
        .create(NewTicket::new("R1", "D1"))
        .await
        .context(SyncValidationSnafu {
            stage: "scenario-malformed-create",
        })?;

    // A sibling the decoder cannot understand must not poison the list.
    let garbage = paths::account_tickets(&AccountId::from("u1")).child("not-a-uuid");
    tree.write(&garbage, json!("scalar"))
        .await
        .context(RemoteAccessSnafu {
            stage: "scenario-malformed-write",
        })?;

    let listed = store.fetch_all().await.context(SyncValidationSnafu {
        stage: "scenario-malformed-fetch",
    })?;
    ensure_scenario(
        listed.as_slice() == [created.clone()],
        "malformed_child_skip",
        "malformed sibling was not skipped",
    )?;

    println!("malformed_child_skip=true");
    println!("runner_ok=true");
    Ok(())
}

async fn run_empty_draft_rejected() -> RunnerResult<()> {
    let tree = memory_tree();
    let (_, chat) = seeded_chat(&tree, "u1", Role::Regular).await?;
    chat.set_draft_text("   ");

    let rejected = matches!(chat.send().await, Err(SyncError::EmptyDraft { .. }));
    ensure_scenario(
        rejected,
        "empty_draft_rejected",
        "blank draft was not rejected with the validation error",
    )?;
    ensure_scenario(
        chat.send_phase() == SendPhase::Idle,
        "empty_draft_rejected",
        "send phase moved off idle for a rejected draft",
    )?;

    println!("empty_draft_rejected=true");
    println!("runner_ok=true");
    Ok(())
}

async fn run_support_cross_write() -> RunnerResult<()> {
    let tree = memory_tree();
    let store = regular_store(&tree, "u1");
    let created = store
        .create(NewTicket::new("R1", "D1"))
        .await
        .context(SyncValidationSnafu {
            stage: "scenario-support-create",
        })?;

    let support_chat = ChatSync::new(
        Arc::clone(&tree) as Arc<dyn RemoteTree>,
        uploader_for(&blob_store()),
        Account::new(AccountId::from("s1"), Role::Support),
        created.id,
    );
    support_chat.set_draft_text("support reply");
    let sent = support_chat.send().await.context(SyncValidationSnafu {
        stage: "scenario-support-send",
    })?;

    let raw = tree
        .read(&paths::message_path(&AccountId::from("u1"), created.id, sent.id))
        .await
        .context(RemoteAccessSnafu {
            stage: "scenario-support-read",
        })?;
    ensure_scenario(
        raw.get("isFromSupport") == Some(&Value::Bool(true)),
        "support_cross_write",
        "support message did not land under the owning account",
    )?;

    println!("support_cross_write=true");
    println!("runner_ok=true");
    Ok(())
}

async fn run_upload_abort() -> RunnerResult<()> {
    let tree = memory_tree();
    let (ticket_id, _) = seeded_chat(&tree, "u1", Role::Regular).await?;

    let blobs = blob_store();
    blobs.fail_nth_store(2);
    let chat = ChatSync::new(
        Arc::clone(&tree) as Arc<dyn RemoteTree>,
        uploader_for(&blobs),
        Account::new(AccountId::from("u1"), Role::Regular),
        ticket_id,
    );
    chat.set_draft_text("two attachments");
    chat.push_draft_image(sample_image());
    chat.push_draft_image(sample_image());

    let aborted = matches!(chat.send().await, Err(SyncError::Upload { .. }));
    ensure_scenario(aborted, "upload_abort", "second store failure did not abort the send")?;
    ensure_scenario(
        blobs.object_count() == 1,
        "upload_abort",
        "expected exactly one orphaned object after the abort",
    )?;

    let messages = tree
        .read(&paths::ticket_messages(&AccountId::from("u1"), ticket_id))
        .await
        .context(RemoteAccessSnafu {
            stage: "scenario-upload-abort-read",
        })?;
    ensure_scenario(
        messages == Value::Null,
        "upload_abort",
        "a record was committed despite the failed upload",
    )?;
    ensure_scenario(
        !chat.draft().is_empty(),
        "upload_abort",
        "draft was cleared by a failed send",
    )?;

    println!("upload_abort=true");
    println!("runner_ok=true");
    Ok(())
}

async fn run_decode_idempotent() -> RunnerResult<()> {
    let ticket_id = TicketId::new_v7();
    let snapshot = json!({
        "u1": {
            "tickets": {
                ticket_id.to_string(): {
                    "reference": "R1",
                    "description": "D1",
                }
            }
        },
        "u2": {
            "tickets": {
                TicketId::new_v7().to_string(): {
                    "reference": "R2",
                    "description": "D2",
                }
            }
        }
    });

    let scope = SyncScope::AllAccounts;
    let first = decode::decode_tickets(&scope, &snapshot).context(SyncValidationSnafu {
        stage: "scenario-decode-first",
    })?;
    let second = decode::decode_tickets(&scope, &snapshot).context(SyncValidationSnafu {
        stage: "scenario-decode-second",
    })?;
    ensure_scenario(
        first == second && first.len() == 2,
        "decode_idempotent",
        "re-decoding the same snapshot produced a different list",
    )?;

    println!("decode_idempotent=true");
    println!("runner_ok=true");
    Ok(())
}

fn ensure_scenario(ok: bool, scenario: &'static str, reason: &str) -> RunnerResult<()> {
    if ok {
        Ok(())
    } else {
        ScenarioFailedSnafu {
            stage: "scenario-check",
            scenario,
            reason: reason.to_string(),
        }
        .fail()
    }
}

fn memory_tree() -> Arc<MemoryTree> {
    Arc::new(MemoryTree::new())
}

fn blob_store() -> Arc<MemoryBlobStore> {
    Arc::new(MemoryBlobStore::new())
}

fn uploader_for(blobs: &Arc<MemoryBlobStore>) -> AttachmentUploader {
    AttachmentUploader::new(Arc::clone(blobs) as Arc<dyn BlobStore>)
}

fn regular_store(tree: &Arc<MemoryTree>, account: &str) -> TicketStore {
    TicketStore::new(
        Arc::clone(tree) as Arc<dyn RemoteTree>,
        uploader_for(&blob_store()),
        Account::new(AccountId::from(account), Role::Regular),
    )
}

fn parse_message_id(raw: &str) -> RunnerResult<MessageId> {
    MessageId::parse(raw).context(SyncValidationSnafu {
        stage: "parse-message-id",
    })
}

async fn seeded_chat(
    tree: &Arc<MemoryTree>,
    account: &str,
    role: Role,
) -> RunnerResult<(TicketId, ChatSync)> {
    let record = TicketRecord {
        id: TicketId::new_v7(),
        reference: "R1".to_string(),
        description: "D1".to_string(),
        attached_photo_urls: None,
    };
    tree.write(
        &paths::ticket_path(&AccountId::from(account), record.id),
        decode::encode_ticket(&record),
    )
    .await
    .context(RemoteAccessSnafu {
        stage: "seed-ticket-write",
    })?;

    let chat = ChatSync::new(
        Arc::clone(tree) as Arc<dyn RemoteTree>,
        uploader_for(&blob_store()),
        Account::new(AccountId::from(account), role),
        record.id,
    );
    Ok((record.id, chat))
}

async fn seed_message(
    tree: &Arc<MemoryTree>,
    account: &str,
    ticket_id: TicketId,
    message_id: MessageId,
    text: &str,
    timestamp_ms: i64,
) -> RunnerResult<()> {
    let record = MessageRecord {
        id: message_id,
        text: text.to_string(),
        timestamp_ms,
        attached_image_urls: None,
        is_from_support: false,
    };
    tree.write(
        &paths::message_path(&AccountId::from(account), ticket_id, message_id),
        decode::encode_message(&record),
    )
    .await
    .context(RemoteAccessSnafu {
        stage: "seed-message-write",
    })
}

fn sample_image() -> Vec<u8> {
    let pixels = image::RgbImage::from_fn(2, 2, |x, y| {
        image::Rgb([(x * 80) as u8, (y * 80) as u8, 200])
    });
    let mut bytes = Vec::new();
    // A 2x2 PNG always encodes; an empty buffer would fail the decode step anyway.
    let _ = image::DynamicImage::ImageRgb8(pixels)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png);
    bytes
}
