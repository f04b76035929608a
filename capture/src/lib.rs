use thiserror::Error;

pub mod client;
pub mod config;
pub mod recorder;
pub mod scope;
pub mod stream;

pub use client::CaptureClient;
pub use config::HttpConfig;
pub use recorder::Recorder;
pub use scope::{with_capture, without_capture, CaptureScope, CaptureSettings};
pub use stream::{RecordingConnector, RecordingStream};

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Client(#[from] hyper::Error),
    #[error(transparent)]
    Request(#[from] hyper::http::Error),
    #[error("request timed out")]
    TimedOut,
    #[error("invalid header `{0}` in configuration")]
    Header(String),
}

pub type CaptureResult<T> = Result<T, CaptureError>;
