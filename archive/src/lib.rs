use thiserror::Error;

pub mod cdxj;
pub mod config;
pub mod dedup;
pub mod ipfs;
pub mod sink;
pub mod snapshot;
pub mod store;
pub mod warc;
pub mod writer;

pub use cdxj::CdxIndexer;
pub use config::{ArchiveConfig, SinkConfig};
pub use dedup::{DedupDecision, DedupResolver};
pub use sink::{ContentAddressedSink, MemberPlacement, PerRecordSink, RecordSink, SingleFileSink};
pub use warc::{RecordKind, SerializedRecord, WarcBuilder};
pub use writer::{ArchiveHandle, ArchiveJob, ArchiveTask, ArchiveWriter};

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Common(#[from] liverec_common::LiverecError),
    #[error(transparent)]
    Store(#[from] redis::RedisError),
    #[error(transparent)]
    Http(#[from] hyper::Error),
    #[error(transparent)]
    HttpRequest(#[from] hyper::http::Error),
    #[error("content-addressed store: {0}")]
    Ipfs(String),
    #[error("malformed warc member: {0}")]
    Warc(&'static str),
    #[error("invalid url in record: {0}")]
    Url(#[from] url::ParseError),
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;
