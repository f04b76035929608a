use thiserror::Error;

pub mod surt;
pub use surt::*;

mod digest;
pub use digest::*;

mod spill;
pub use spill::*;

mod cdxj;
pub use cdxj::*;

mod capture;
pub use capture::*;

#[derive(Error, Debug)]
pub enum LiverecError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("malformed cdxj line: {0}")]
    Cdxj(&'static str),
    #[error(transparent)]
    Timestamp(#[from] time::error::Parse),
}

pub type LiverecResult<T> = Result<T, LiverecError>;
