use std::io;
use std::net::SocketAddr;

use liverec_common::{Digester, FinishedCapture, PayloadInfo, RecordedBody, SpillBuffer};
use time::OffsetDateTime;
use tracing::debug;
use url::Url;

/// Upper bound on a buffered request line before url parsing gives up.
const REQUEST_LINE_LIMIT: usize = 8 * 1024;

/// Upper bound on the response header block scan. Past this the response is
/// treated as an opaque blob with no payload boundary.
const HEADER_SCAN_LIMIT: usize = 256 * 1024;

struct Leg {
    buf: SpillBuffer,
    digest: Digester,
    /// Rolling view of the last few bytes appended, for end-of-body framing
    /// checks without re-reading spilled data.
    tail: [u8; 8],
    tail_len: usize,
}

impl Leg {
    fn new() -> Leg {
        Leg {
            buf: SpillBuffer::new(),
            digest: Digester::new(),
            tail: [0; 8],
            tail_len: 0,
        }
    }

    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.buf.append(bytes)?;
        self.digest.update(bytes);

        if bytes.len() >= self.tail.len() {
            let tail_len = self.tail.len();
            self.tail.copy_from_slice(&bytes[bytes.len() - tail_len..]);
            self.tail_len = self.tail.len();
        } else {
            let keep = (self.tail.len() - bytes.len()).min(self.tail_len);
            self.tail.copy_within(self.tail_len - keep..self.tail_len, 0);
            self.tail[keep..keep + bytes.len()].copy_from_slice(bytes);
            self.tail_len = keep + bytes.len();
        }
        Ok(())
    }

    fn tail(&self) -> &[u8] {
        &self.tail[..self.tail_len]
    }

    fn into_recorded(self) -> io::Result<RecordedBody> {
        Ok(RecordedBody {
            len: self.buf.len(),
            digest: self.digest.finalize(),
            reader: self.buf.into_reader()?,
        })
    }
}

enum ResponseFraming {
    /// Still inside the header block, scanning for the CRLFCRLF boundary.
    Scanning,
    /// Boundary found; everything from here on is payload.
    Body,
    /// Header block never terminated within the scan limit.
    Opaque,
}

/// Byte-faithful accumulator for one HTTP transaction. The k-th byte the
/// transport sends or receives is the k-th byte appended to the matching leg
/// and hashed; no reordering, no interpretation beyond the payload boundary
/// and the completeness framing.
pub struct Recorder {
    origin: String,
    url: Option<Url>,
    method: Option<String>,
    remote_addr: Option<SocketAddr>,
    request: Leg,
    response: Leg,
    payload: Digester,
    payload_offset: u64,
    line_buf: Vec<u8>,
    header_buf: Vec<u8>,
    framing: ResponseFraming,
    status: Option<u16>,
    content_length: Option<u64>,
    chunked: bool,
    incomplete: bool,
    finished: bool,
}

impl Recorder {
    /// `origin` is the `scheme://authority` of the connection target, used to
    /// absolutize origin-form request targets.
    pub fn new(origin: String) -> Recorder {
        Recorder {
            origin,
            url: None,
            method: None,
            remote_addr: None,
            request: Leg::new(),
            response: Leg::new(),
            payload: Digester::new(),
            payload_offset: 0,
            line_buf: Vec::new(),
            header_buf: Vec::new(),
            framing: ResponseFraming::Scanning,
            status: None,
            content_length: None,
            chunked: false,
            incomplete: false,
            finished: false,
        }
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn set_remote_addr(&mut self, addr: Option<SocketAddr>) {
        if self.remote_addr.is_none() {
            self.remote_addr = addr;
        }
    }

    pub fn mark_incomplete(&mut self) {
        if !self.finished {
            self.incomplete = true;
        }
    }

    pub fn is_incomplete(&self) -> bool {
        self.incomplete
    }

    /// Tee of the request leg. The first CRLF-terminated line is parsed as
    /// `METHOD SP target SP HTTP/x` to fix the transaction url; a malformed
    /// line is an error and fails the transaction before any record exists.
    pub fn record_request(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }

        if self.url.is_none() {
            self.line_buf.extend_from_slice(bytes);
            if let Some(pos) = find(&self.line_buf, b"\r\n") {
                let line = self.line_buf[..pos].to_vec();
                self.parse_request_line(&line)?;
                self.line_buf = Vec::new();
            } else if self.line_buf.len() > REQUEST_LINE_LIMIT {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "request line exceeds limit without terminating",
                ));
            }
        }

        self.request.append(bytes)
    }

    /// Tee of the response leg. Splits the header block from the payload at
    /// the first CRLFCRLF; payload bytes additionally feed the payload
    /// digest.
    pub fn record_response(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }

        self.response.append(bytes)?;

        match self.framing {
            ResponseFraming::Body => self.payload.update(bytes),
            ResponseFraming::Opaque => {}
            ResponseFraming::Scanning => {
                let scan_from = self.header_buf.len().saturating_sub(3);
                self.header_buf.extend_from_slice(bytes);

                if let Some(pos) = find(&self.header_buf[scan_from..], b"\r\n\r\n") {
                    let boundary = scan_from + pos + 4;
                    self.payload_offset = boundary as u64;
                    let spillover = self.header_buf.split_off(boundary);
                    self.payload.update(&spillover);
                    self.parse_response_head();
                    self.framing = ResponseFraming::Body;
                } else if self.header_buf.len() > HEADER_SCAN_LIMIT {
                    self.header_buf = Vec::new();
                    self.framing = ResponseFraming::Opaque;
                }
            }
        }

        Ok(())
    }

    /// Closes the recording. Idempotent: the first call decides, every later
    /// call returns `None`. Incomplete or empty transactions are discarded
    /// whole; nothing partial ever reaches a sink.
    pub fn finish(&mut self, now: OffsetDateTime) -> Option<FinishedCapture> {
        if self.finished {
            return None;
        }
        self.finished = true;

        if self.incomplete {
            debug!(url = ?self.url, "discarding incomplete capture");
            return None;
        }

        let url = self.url.take()?;

        if self.response.buf.is_empty() {
            debug!(url = %url, "no response bytes; nothing to archive");
            return None;
        }

        if !self.payload_satisfies_framing() {
            debug!(url = %url, "response framing unsatisfied; discarding partial transfer");
            return None;
        }

        let payload = match self.framing {
            ResponseFraming::Body => Some(PayloadInfo {
                offset: self.payload_offset,
                digest: std::mem::take(&mut self.payload).finalize(),
            }),
            _ => None,
        };

        let request = std::mem::replace(&mut self.request, Leg::new());
        let response = std::mem::replace(&mut self.response, Leg::new());

        let (request, response) = match (request.into_recorded(), response.into_recorded()) {
            (Ok(req), Ok(resp)) => (req, resp),
            (Err(e), _) | (_, Err(e)) => {
                debug!(url = %url, error = %e, "failed to seal capture buffers");
                return None;
            }
        };

        Some(FinishedCapture {
            url,
            remote_addr: self.remote_addr,
            fetched_at: now,
            request,
            response,
            payload,
        })
    }

    fn parse_request_line(&mut self, line: &[u8]) -> io::Result<()> {
        let text = std::str::from_utf8(line)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "request line is not ascii"))?;

        let mut parts = text.split(' ');
        let (method, target) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(t), Some(v), None) if !m.is_empty() && v.starts_with("HTTP/") => (m, t),
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "malformed request line",
                ))
            }
        };

        let absolute = if target.starts_with("http://") || target.starts_with("https://") {
            target.to_owned()
        } else {
            format!("{}{}", self.origin, target)
        };

        self.url = Some(Url::parse(&absolute).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidData, "request target does not form a url")
        })?);
        self.method = Some(method.to_owned());

        Ok(())
    }

    fn parse_response_head(&mut self) {
        let mut headers = [httparse::EMPTY_HEADER; 64];
        let mut parsed = httparse::Response::new(&mut headers);
        if parsed.parse(&self.header_buf).is_err() {
            return;
        }

        self.status = parsed.code;

        for header in parsed.headers.iter() {
            if header.name.eq_ignore_ascii_case("content-length") {
                self.content_length = std::str::from_utf8(header.value)
                    .ok()
                    .and_then(|v| v.trim().parse().ok());
            } else if header.name.eq_ignore_ascii_case("transfer-encoding") {
                let value = String::from_utf8_lossy(header.value);
                if value.to_ascii_lowercase().contains("chunked") {
                    self.chunked = true;
                }
            }
        }
    }

    /// Partial transfers are dropped, not archived. This is the minimal
    /// framing check that rule requires: a declared content-length must be
    /// covered, a chunked body must have reached its terminal chunk.
    fn payload_satisfies_framing(&self) -> bool {
        if !matches!(self.framing, ResponseFraming::Body) {
            return true;
        }
        if matches!(self.method.as_deref(), Some("HEAD")) {
            return true;
        }
        if matches!(self.status, Some(204) | Some(304)) {
            return true;
        }

        if self.chunked {
            return self.response.tail().ends_with(b"0\r\n\r\n");
        }

        match self.content_length {
            Some(declared) => self.response.buf.len() - self.payload_offset >= declared,
            None => true,
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
