use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RemoteError {
    #[snafu(display("remote write failed at '{path}'"))]
    WriteFailed { stage: &'static str, path: String },
    #[snafu(display("remote read failed at '{path}'"))]
    ReadFailed { stage: &'static str, path: String },
    #[snafu(display("remote remove failed at '{path}'"))]
    RemoveFailed { stage: &'static str, path: String },
    #[snafu(display("remote listener registration failed at '{path}'"))]
    ObserveFailed { stage: &'static str, path: String },
}

pub type RemoteResult<T> = Result<T, RemoteError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BlobError {
    #[snafu(display("object store rejected key '{key}': {reason}"))]
    StoreFailed {
        stage: &'static str,
        key: String,
        reason: String,
    },
}

pub type BlobResult<T> = Result<T, BlobError>;
