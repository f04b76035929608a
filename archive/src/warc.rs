use std::io::{self, Read, Write};

use flate2::{write::GzEncoder, Compression};
use liverec_common::{warc_date, Digester, FinishedCapture, RecordedBody, Sha1Digest};
use time::OffsetDateTime;
use url::Url;
use uuid::Uuid;

use crate::{dedup::DedupDecision, ArchiveResult};

pub const REVISIT_PROFILE: &str =
    "http://netpreserve.org/warc/1.0/revisit/uri-agnostic-identical-payload-digest";

/// Writes one WARC record as a single gzip member (or a plain blob when
/// compression is off). A fresh writer per record keeps every member
/// independently seekable; reusing one across records would fuse them.
pub struct MemberWriter<W: Write> {
    inner: MemberEncoder<W>,
}

enum MemberEncoder<W: Write> {
    Gzip(GzEncoder<W>),
    Plain(W),
}

impl<W: Write> MemberWriter<W> {
    pub fn new(out: W, gzip: bool) -> MemberWriter<W> {
        MemberWriter {
            inner: if gzip {
                MemberEncoder::Gzip(GzEncoder::new(out, Compression::best()))
            } else {
                MemberEncoder::Plain(out)
            },
        }
    }

    pub fn finish(self) -> io::Result<W> {
        match self.inner {
            MemberEncoder::Gzip(encoder) => encoder.finish(),
            MemberEncoder::Plain(mut out) => {
                out.flush()?;
                Ok(out)
            }
        }
    }
}

impl<W: Write> Write for MemberWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.inner {
            MemberEncoder::Gzip(encoder) => encoder.write(buf),
            MemberEncoder::Plain(out) => out.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.inner {
            MemberEncoder::Gzip(encoder) => encoder.flush(),
            MemberEncoder::Plain(out) => out.flush(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    Response,
    Revisit,
    Request,
    Metadata,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Response => "response",
            RecordKind::Revisit => "revisit",
            RecordKind::Request => "request",
            RecordKind::Metadata => "metadata",
        }
    }
}

/// One complete serialized member, ready for a sink.
pub struct SerializedRecord {
    pub id: Uuid,
    pub kind: RecordKind,
    pub bytes: Vec<u8>,
}

/// Serializes finished captures into WARC 1.0 records. The response record
/// always precedes the request record so the request's `WARC-Concurrent-To`
/// can name it.
pub struct WarcBuilder {
    gzip: bool,
}

impl WarcBuilder {
    pub fn new(gzip: bool) -> WarcBuilder {
        WarcBuilder { gzip }
    }

    /// Turns one capture into its member sequence given the dedup decision.
    /// `Skip` yields no records at all.
    pub fn build_transaction(
        &self,
        capture: FinishedCapture,
        decision: DedupDecision,
    ) -> ArchiveResult<Vec<SerializedRecord>> {
        if matches!(decision, DedupDecision::Skip) {
            return Ok(Vec::new());
        }

        let FinishedCapture {
            url,
            remote_addr,
            fetched_at,
            request,
            response,
            payload,
        } = capture;

        let date = warc_date(fetched_at);
        let ip = remote_addr
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default();
        let response_id = Uuid::new_v4();

        let response_record = match decision {
            DedupDecision::Revisit {
                url: refers_to,
                date: refers_date,
            } => self.revisit_record(
                response_id,
                &url,
                &date,
                &ip,
                response,
                payload.map(|p| (p.offset, p.digest)),
                &refers_to,
                refers_date,
            )?,
            _ => self.response_record(
                response_id,
                &url,
                &date,
                &ip,
                response,
                payload.map(|p| p.digest),
            )?,
        };

        let request_record = self.request_record(response_id, &url, &date, &ip, request)?;

        Ok(vec![response_record, request_record])
    }

    fn response_record(
        &self,
        id: Uuid,
        url: &Url,
        date: &str,
        ip: &str,
        response: RecordedBody,
        payload_digest: Option<Sha1Digest>,
    ) -> ArchiveResult<SerializedRecord> {
        let RecordedBody {
            len,
            digest,
            mut reader,
        } = response;

        self.serialize(
            id,
            RecordKind::Response,
            &[
                ("WARC-Type", "response".to_owned()),
                ("WARC-Record-ID", record_id(&id)),
                ("WARC-Date", date.to_owned()),
                ("WARC-Target-URI", url.to_string()),
                ("WARC-IP-Address", ip.to_owned()),
                ("WARC-Block-Digest", digest.to_string()),
                (
                    "WARC-Payload-Digest",
                    payload_digest.map(|d| d.to_string()).unwrap_or_default(),
                ),
                (
                    "Content-Type",
                    "application/http; msgtype=response".to_owned(),
                ),
                ("Content-Length", len.to_string()),
            ],
            &mut reader,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn revisit_record(
        &self,
        id: Uuid,
        url: &Url,
        date: &str,
        ip: &str,
        response: RecordedBody,
        payload: Option<(u64, Sha1Digest)>,
        refers_to: &str,
        refers_date: OffsetDateTime,
    ) -> ArchiveResult<SerializedRecord> {
        // A revisit only ever comes out of a payload-digest match, so the
        // boundary is known here.
        let (offset, payload_digest) = payload.unwrap_or((response.len, response.digest));

        // The revisit body is just the header prefix of the response block.
        // It is bounded by the header scan cap, so buffering it to compute
        // the prefix block digest is fine.
        let mut prefix = Vec::with_capacity(offset as usize);
        let mut reader = response.reader;
        reader.by_ref().take(offset).read_to_end(&mut prefix)?;

        let mut prefix_digest = Digester::new();
        prefix_digest.update(&prefix);

        self.serialize(
            id,
            RecordKind::Revisit,
            &[
                ("WARC-Type", "revisit".to_owned()),
                ("WARC-Record-ID", record_id(&id)),
                ("WARC-Date", date.to_owned()),
                ("WARC-Target-URI", url.to_string()),
                ("WARC-IP-Address", ip.to_owned()),
                ("WARC-Block-Digest", prefix_digest.finalize().to_string()),
                ("WARC-Payload-Digest", payload_digest.to_string()),
                ("WARC-Profile", REVISIT_PROFILE.to_owned()),
                ("WARC-Refers-To-Target-URI", refers_to.to_owned()),
                ("WARC-Refers-To-Date", warc_date(refers_date)),
                (
                    "Content-Type",
                    "application/http; msgtype=response".to_owned(),
                ),
                ("Content-Length", offset.to_string()),
            ],
            &mut io::Cursor::new(prefix),
        )
    }

    fn request_record(
        &self,
        response_id: Uuid,
        url: &Url,
        date: &str,
        ip: &str,
        request: RecordedBody,
    ) -> ArchiveResult<SerializedRecord> {
        let RecordedBody {
            len,
            digest,
            mut reader,
        } = request;
        let id = Uuid::new_v4();

        self.serialize(
            id,
            RecordKind::Request,
            &[
                ("WARC-Type", "request".to_owned()),
                ("WARC-Record-ID", record_id(&id)),
                ("WARC-Date", date.to_owned()),
                ("WARC-Target-URI", url.to_string()),
                ("WARC-IP-Address", ip.to_owned()),
                ("WARC-Concurrent-To", record_id(&response_id)),
                ("WARC-Block-Digest", digest.to_string()),
                (
                    "Content-Type",
                    "application/http; msgtype=request".to_owned(),
                ),
                ("Content-Length", len.to_string()),
            ],
            &mut reader,
        )
    }

    /// Caller-injected `metadata` record with its own fresh id.
    pub fn metadata_record(
        &self,
        url: &str,
        content_type: &str,
        data: &[u8],
    ) -> ArchiveResult<SerializedRecord> {
        let id = Uuid::new_v4();
        let mut digest = Digester::new();
        digest.update(data);

        self.serialize(
            id,
            RecordKind::Metadata,
            &[
                ("WARC-Type", "metadata".to_owned()),
                ("WARC-Record-ID", record_id(&id)),
                ("WARC-Date", warc_date(OffsetDateTime::now_utc())),
                ("WARC-Target-URI", url.to_owned()),
                ("WARC-Block-Digest", digest.finalize().to_string()),
                ("Content-Type", content_type.to_owned()),
                ("Content-Length", data.len().to_string()),
            ],
            &mut io::Cursor::new(data),
        )
    }

    /// Common framing: version line, CRLF-terminated headers (empty values
    /// omitted), blank line, exactly the declared body bytes, terminating
    /// CRLFCRLF. Every call gets its own member writer.
    fn serialize(
        &self,
        id: Uuid,
        kind: RecordKind,
        headers: &[(&str, String)],
        body: &mut impl Read,
    ) -> ArchiveResult<SerializedRecord> {
        let mut member = MemberWriter::new(Vec::with_capacity(4096), self.gzip);

        member.write_all(b"WARC/1.0\r\n")?;
        for (name, value) in headers {
            if !value.is_empty() {
                write!(member, "{name}: {value}\r\n")?;
            }
        }
        member.write_all(b"\r\n")?;

        io::copy(body, &mut member)?;
        member.write_all(b"\r\n\r\n")?;

        Ok(SerializedRecord {
            id,
            kind,
            bytes: member.finish()?,
        })
    }
}

fn record_id(id: &Uuid) -> String {
    format!("<urn:uuid:{}>", id.hyphenated())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::bufread::GzDecoder;
    use liverec_common::{sha1_of, PayloadInfo, RecordedBody};
    use time::macros::datetime;

    const WIRE: &[u8] =
        b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 6\r\n\r\nhello\n";

    fn capture_of(wire: &[u8]) -> FinishedCapture {
        let request = b"GET / HTTP/1.1\r\nhost: example.com\r\n\r\n".to_vec();
        let offset = (wire.len() - 6) as u64;

        FinishedCapture {
            url: Url::parse("http://example.com/").unwrap(),
            remote_addr: Some("93.184.216.34:80".parse().unwrap()),
            fetched_at: datetime!(2026-08-01 12:00:00 UTC),
            request: RecordedBody::from_bytes(request).unwrap(),
            response: RecordedBody::from_bytes(wire.to_vec()).unwrap(),
            payload: Some(PayloadInfo {
                offset,
                digest: sha1_of(b"hello\n"),
            }),
        }
    }

    fn decode(member: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        GzDecoder::new(member)
            .read_to_end(&mut out)
            .expect("valid gzip member");
        out
    }

    fn header_value<'a>(record: &'a str, name: &str) -> Option<&'a str> {
        record
            .lines()
            .take_while(|line| !line.is_empty())
            .find_map(|line| {
                line.split_once(": ")
                    .filter(|(n, _)| *n == name)
                    .map(|(_, v)| v)
            })
    }

    #[test]
    fn response_and_request_members_are_independent_gzip() {
        let builder = WarcBuilder::new(true);
        let records = builder
            .build_transaction(capture_of(WIRE), DedupDecision::Write)
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, RecordKind::Response);
        assert_eq!(records[1].kind, RecordKind::Request);

        for record in &records {
            let decoded = decode(&record.bytes);
            assert!(decoded.starts_with(b"WARC/1.0\r\n"));
            assert!(decoded.ends_with(b"\r\n\r\n"));
        }
    }

    #[test]
    fn content_length_matches_the_body_exactly() {
        let builder = WarcBuilder::new(true);
        let records = builder
            .build_transaction(capture_of(WIRE), DedupDecision::Write)
            .unwrap();

        let decoded = decode(&records[0].bytes);
        let text = String::from_utf8_lossy(&decoded);
        let declared: usize = header_value(&text, "Content-Length").unwrap().parse().unwrap();
        assert_eq!(declared, WIRE.len());

        // Body is exactly the declared bytes between the blank line and the
        // trailing CRLFCRLF.
        let header_end = decoded.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        let body = &decoded[header_end..decoded.len() - 4];
        assert_eq!(body, WIRE);
    }

    #[test]
    fn request_refers_to_the_response_record() {
        let builder = WarcBuilder::new(true);
        let records = builder
            .build_transaction(capture_of(WIRE), DedupDecision::Write)
            .unwrap();

        let response = String::from_utf8_lossy(&decode(&records[0].bytes)).into_owned();
        let request = String::from_utf8_lossy(&decode(&records[1].bytes)).into_owned();

        let response_id = header_value(&response, "WARC-Record-ID").unwrap();
        assert_eq!(
            header_value(&request, "WARC-Concurrent-To").unwrap(),
            response_id
        );
        assert_eq!(
            header_value(&response, "WARC-Target-URI").unwrap(),
            "http://example.com/"
        );
        assert_eq!(
            header_value(&response, "WARC-IP-Address").unwrap(),
            "93.184.216.34"
        );
        assert_eq!(
            header_value(&response, "WARC-Payload-Digest").unwrap(),
            sha1_of(b"hello\n").to_string()
        );
    }

    #[test]
    fn header_order_follows_the_canonical_sequence() {
        let builder = WarcBuilder::new(true);
        let records = builder
            .build_transaction(capture_of(WIRE), DedupDecision::Write)
            .unwrap();

        let decoded = decode(&records[0].bytes);
        let text = String::from_utf8_lossy(&decoded);
        let names: Vec<&str> = text
            .lines()
            .skip(1)
            .take_while(|line| !line.is_empty())
            .filter_map(|line| line.split_once(": ").map(|(n, _)| n))
            .collect();

        assert_eq!(
            names,
            vec![
                "WARC-Type",
                "WARC-Record-ID",
                "WARC-Date",
                "WARC-Target-URI",
                "WARC-IP-Address",
                "WARC-Block-Digest",
                "WARC-Payload-Digest",
                "Content-Type",
                "Content-Length",
            ]
        );
    }

    #[test]
    fn revisit_body_is_only_the_header_prefix() {
        let builder = WarcBuilder::new(true);
        let records = builder
            .build_transaction(
                capture_of(WIRE),
                DedupDecision::Revisit {
                    url: "http://example.com/".to_owned(),
                    date: datetime!(2026-07-31 08:00:00 UTC),
                },
            )
            .unwrap();

        assert_eq!(records[0].kind, RecordKind::Revisit);

        let decoded = decode(&records[0].bytes);
        let text = String::from_utf8_lossy(&decoded);

        let prefix_len = WIRE.len() - 6;
        let declared: usize = header_value(&text, "Content-Length").unwrap().parse().unwrap();
        assert_eq!(declared, prefix_len);

        assert_eq!(header_value(&text, "WARC-Profile").unwrap(), REVISIT_PROFILE);
        assert_eq!(
            header_value(&text, "WARC-Refers-To-Target-URI").unwrap(),
            "http://example.com/"
        );
        assert_eq!(
            header_value(&text, "WARC-Refers-To-Date").unwrap(),
            "2026-07-31T08:00:00Z"
        );

        let header_end = decoded.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        let body = &decoded[header_end..decoded.len() - 4];
        assert_eq!(body, &WIRE[..prefix_len]);
        assert_eq!(
            header_value(&text, "WARC-Block-Digest").unwrap(),
            sha1_of(&WIRE[..prefix_len]).to_string()
        );
    }

    #[test]
    fn skip_emits_nothing() {
        let builder = WarcBuilder::new(true);
        let records = builder
            .build_transaction(capture_of(WIRE), DedupDecision::Skip)
            .unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn metadata_record_carries_the_given_type_and_bytes() {
        let builder = WarcBuilder::new(true);
        let record = builder
            .metadata_record("metadata://x", "application/json", b"{}")
            .unwrap();

        assert_eq!(record.kind, RecordKind::Metadata);
        let decoded = decode(&record.bytes);
        let text = String::from_utf8_lossy(&decoded);

        assert_eq!(header_value(&text, "WARC-Type").unwrap(), "metadata");
        assert_eq!(
            header_value(&text, "WARC-Target-URI").unwrap(),
            "metadata://x"
        );
        assert_eq!(
            header_value(&text, "Content-Type").unwrap(),
            "application/json"
        );
        assert_eq!(header_value(&text, "Content-Length").unwrap(), "2");
        assert_eq!(
            header_value(&text, "WARC-Block-Digest").unwrap(),
            "sha1:X4Q2T2H3YWRYI35QLNH2BBM6BEL3EIBP"
        );

        let header_end = decoded.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        assert_eq!(&decoded[header_end..decoded.len() - 4], b"{}");
    }

    #[test]
    fn plain_members_skip_compression_with_identical_framing() {
        let builder = WarcBuilder::new(false);
        let records = builder
            .build_transaction(capture_of(WIRE), DedupDecision::Write)
            .unwrap();

        assert!(records[0].bytes.starts_with(b"WARC/1.0\r\n"));
        assert!(records[0].bytes.ends_with(b"\r\n\r\n"));
    }
}
