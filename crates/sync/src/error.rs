use snafu::Snafu;

use tether_remote::RemoteError;

use crate::ids::TicketId;
use crate::upload::AttachmentError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SyncError {
    #[snafu(display("required field '{field}' is empty"))]
    EmptyField {
        stage: &'static str,
        field: &'static str,
    },
    #[snafu(display("message draft has neither text nor attachments"))]
    EmptyDraft { stage: &'static str },
    #[snafu(display("no account is signed in"))]
    NotSignedIn { stage: &'static str },
    #[snafu(display("id '{raw}' is not a valid {id_type}"))]
    InvalidId {
        stage: &'static str,
        id_type: &'static str,
        raw: String,
        source: uuid::Error,
    },
    #[snafu(display("attachment pipeline failed on `{stage}`: {source}"))]
    Upload {
        stage: &'static str,
        source: AttachmentError,
    },
    #[snafu(display("remote write failed on `{stage}`: {source}"))]
    RemoteWrite {
        stage: &'static str,
        source: RemoteError,
    },
    #[snafu(display("remote read failed on `{stage}`: {source}"))]
    RemoteRead {
        stage: &'static str,
        source: RemoteError,
    },
    #[snafu(display("ticket '{ticket_id}' is not held by any account"))]
    TicketOwnerNotFound {
        stage: &'static str,
        ticket_id: TicketId,
    },
    #[snafu(display("snapshot root has the wrong shape: {details}"))]
    MalformedSnapshot {
        stage: &'static str,
        details: String,
    },
}

pub type SyncResult<T> = Result<T, SyncError>;
