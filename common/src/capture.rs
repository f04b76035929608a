use std::fmt::{self, Debug};
use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use time::OffsetDateTime;
use url::Url;

use crate::{sha1_of, Sha1Digest, SpillBuffer, SpillReader};

/// One leg of a finished transaction: everything the transport sent or
/// received, with its block digest. The reader is single-pass.
pub struct RecordedBody {
    pub len: u64,
    pub digest: Sha1Digest,
    pub reader: SpillReader,
}

impl RecordedBody {
    pub fn from_bytes(bytes: Vec<u8>) -> io::Result<RecordedBody> {
        let digest = sha1_of(&bytes);
        let mut buf = SpillBuffer::new();
        buf.append(&bytes)?;
        Ok(RecordedBody {
            len: buf.len(),
            digest,
            reader: buf.into_reader()?,
        })
    }
}

impl Debug for RecordedBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordedBody")
            .field("len", &self.len)
            .field("digest", &self.digest)
            .finish()
    }
}

/// Where the HTTP payload sits inside the recorded response bytes. Absent
/// when the header block never terminated, in which case the response is
/// archived whole and never deduplicated.
#[derive(Clone, Copy, Debug)]
pub struct PayloadInfo {
    /// Byte offset of the first payload byte (right after the CRLFCRLF).
    pub offset: u64,
    pub digest: Sha1Digest,
}

/// A completed, byte-faithful recording of one HTTP transaction, ready to be
/// serialized into WARC records.
#[derive(Debug)]
pub struct FinishedCapture {
    pub url: Url,
    pub remote_addr: Option<SocketAddr>,
    pub fetched_at: OffsetDateTime,
    pub request: RecordedBody,
    pub response: RecordedBody,
    pub payload: Option<PayloadInfo>,
}

/// Consumer of finished captures. Implementations own their error handling;
/// nothing on this path may surface back into the HTTP caller.
#[async_trait]
pub trait CaptureSink: Send + Sync + 'static {
    async fn accept(&self, capture: FinishedCapture);
}
