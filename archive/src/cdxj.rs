use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use flate2::bufread::GzDecoder;
use liverec_common::{parse_warc_date, surt, CdxRecord, CdxjBlock};
use neo_mime::MediaType;
use tracing::{debug, warn};
use url::Url;

use crate::{sink::MemberPlacement, store::OrderedStore, ArchiveError, ArchiveResult};

/// Parses just-written members back out of their sink bytes and appends one
/// CDXJ line per indexable record to the ordered store. `request` records
/// are recorded on disk but not indexed.
pub struct CdxIndexer {
    store: Arc<dyn OrderedStore>,
    key: String,
}

impl CdxIndexer {
    pub fn new(store: Arc<dyn OrderedStore>, key: impl Into<String>) -> CdxIndexer {
        CdxIndexer {
            store,
            key: key.into(),
        }
    }

    /// Indexes one member given the bytes the sink just wrote and where they
    /// landed. A store failure logs and returns the error; the member is
    /// already durable, so an offline reindex can recover the line.
    pub async fn index_member(
        &self,
        member: &[u8],
        placement: &MemberPlacement,
    ) -> ArchiveResult<bool> {
        let decoded = decode_member(member)?;
        let Some(line) = cdx_line(&decoded, placement)? else {
            return Ok(false);
        };

        if let Err(e) = self.store.append(&self.key, &line.to_line()).await {
            warn!(error = %e, filename = %placement.filename, "cdxj insert failed; member remains recoverable by reindex");
            return Err(e);
        }

        Ok(true)
    }

    /// Offline (re)indexing of a whole archive file: walks every member and
    /// appends the lines the live path would have produced.
    pub async fn index_file(&self, path: &Path) -> ArchiveResult<usize> {
        let data = std::fs::read(path)?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut indexed = 0;
        for member in members_of(&data) {
            let (offset, length, decoded) = member?;
            let placement = MemberPlacement {
                filename: filename.clone(),
                offset,
                length,
            };

            match cdx_line(&decoded, &placement)? {
                Some(line) => {
                    self.store.append(&self.key, &line.to_line()).await?;
                    indexed += 1;
                }
                None => debug!(offset, "skipping unindexed record"),
            }
        }

        Ok(indexed)
    }
}

/// Iterates the members of an archive blob, yielding each member's offset,
/// stored length, and decoded bytes. Handles both gzip-member archives and
/// plain concatenations.
pub fn members_of(data: &[u8]) -> MemberIter<'_> {
    MemberIter { data, pos: 0 }
}

pub struct MemberIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Iterator for MemberIter<'_> {
    type Item = ArchiveResult<(u64, u64, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }

        let start = self.pos;
        let rest = &self.data[start..];

        if rest.starts_with(&[0x1f, 0x8b]) {
            let mut cursor = std::io::Cursor::new(rest);
            let mut decoded = Vec::new();
            if let Err(e) = GzDecoder::new(&mut cursor).read_to_end(&mut decoded) {
                self.pos = self.data.len();
                return Some(Err(e.into()));
            }
            let consumed = cursor.position();
            if consumed == 0 {
                self.pos = self.data.len();
                return Some(Err(ArchiveError::Warc("empty gzip member")));
            }
            self.pos = start + consumed as usize;
            Some(Ok((start as u64, consumed, decoded)))
        } else {
            // Plain member: its extent is the header block plus the declared
            // content length plus the trailing CRLFCRLF.
            match plain_member_length(rest) {
                Ok(length) => {
                    let end = (start + length).min(self.data.len());
                    let decoded = self.data[start..end].to_vec();
                    self.pos = end;
                    Some(Ok((start as u64, (end - start) as u64, decoded)))
                }
                Err(e) => {
                    self.pos = self.data.len();
                    Some(Err(e))
                }
            }
        }
    }
}

fn plain_member_length(data: &[u8]) -> ArchiveResult<usize> {
    let header_end = find(data, b"\r\n\r\n")
        .ok_or(ArchiveError::Warc("header block never terminates"))?
        + 4;
    let headers = parse_headers(&data[..header_end])?;
    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .ok_or(ArchiveError::Warc("missing content-length"))?;
    Ok(header_end + content_length + 4)
}

fn decode_member(member: &[u8]) -> ArchiveResult<Vec<u8>> {
    if member.starts_with(&[0x1f, 0x8b]) {
        let mut decoded = Vec::new();
        GzDecoder::new(member).read_to_end(&mut decoded)?;
        Ok(decoded)
    } else {
        Ok(member.to_vec())
    }
}

/// Builds the CDXJ line for one decoded record, or `None` for record types
/// the index does not carry.
pub fn cdx_line(
    decoded: &[u8],
    placement: &MemberPlacement,
) -> ArchiveResult<Option<CdxRecord>> {
    let header_end = find(decoded, b"\r\n\r\n")
        .ok_or(ArchiveError::Warc("header block never terminates"))?
        + 4;
    if !decoded.starts_with(b"WARC/") {
        return Err(ArchiveError::Warc("missing version line"));
    }

    let headers = parse_headers(&decoded[..header_end])?;

    let warc_type = headers
        .get("warc-type")
        .ok_or(ArchiveError::Warc("missing WARC-Type"))?
        .as_str();
    if !matches!(warc_type, "response" | "revisit" | "resource" | "metadata") {
        return Ok(None);
    }

    let target_uri = headers
        .get("warc-target-uri")
        .ok_or(ArchiveError::Warc("missing WARC-Target-URI"))?;
    let date = headers
        .get("warc-date")
        .ok_or(ArchiveError::Warc("missing WARC-Date"))?;
    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .ok_or(ArchiveError::Warc("missing content-length"))?;

    let body = decoded
        .get(header_end..header_end + content_length)
        .ok_or(ArchiveError::Warc("body shorter than declared"))?;

    let digest = headers
        .get("warc-payload-digest")
        .or_else(|| headers.get("warc-block-digest"))
        .cloned()
        .unwrap_or_default();

    let (status, mime) = match warc_type {
        "revisit" => (http_status(body), MediaType::parse("warc/revisit").ok()),
        "response" => (http_status(body), http_mime(body)),
        // Resource and metadata records carry their payload directly; the
        // record's own content type describes it.
        _ => (
            None,
            headers
                .get("content-type")
                .and_then(|v| MediaType::parse(v).ok())
                .map(|m| m.without_params()),
        ),
    };

    let url = Url::parse(target_uri)?;

    Ok(Some(CdxRecord {
        key: surt(&url),
        time: parse_warc_date(date)?,
        block: CdxjBlock {
            url: target_uri.clone(),
            digest,
            mime,
            status,
            length: placement.length,
            offset: placement.offset,
            filename: placement.filename.clone(),
        },
    }))
}

fn parse_headers(head: &[u8]) -> ArchiveResult<std::collections::HashMap<String, String>> {
    let text = std::str::from_utf8(head)
        .map_err(|_| ArchiveError::Warc("header block is not utf-8"))?;

    let mut headers = std::collections::HashMap::new();
    for line in text.lines().skip(1) {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_owned());
        }
    }
    Ok(headers)
}

fn http_status(body: &[u8]) -> Option<u16> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut parsed = httparse::Response::new(&mut headers);
    parsed.parse(body).ok()?;
    parsed.code
}

fn http_mime(body: &[u8]) -> Option<MediaType> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut parsed = httparse::Response::new(&mut headers);
    parsed.parse(body).ok()?;

    parsed
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("content-type"))
        .and_then(|h| std::str::from_utf8(h.value).ok())
        .and_then(|v| MediaType::parse(v).ok())
        .map(|m| m.without_params())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::DedupDecision;
    use crate::warc::WarcBuilder;
    use liverec_common::{sha1_of, FinishedCapture, PayloadInfo, RecordedBody};
    use time::macros::datetime;

    const WIRE: &[u8] =
        b"HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: 6\r\n\r\nhello\n";

    fn capture() -> FinishedCapture {
        FinishedCapture {
            url: Url::parse("http://www.example.com/a?b=1").unwrap(),
            remote_addr: None,
            fetched_at: datetime!(2026-08-01 09:15:30 UTC),
            request: RecordedBody::from_bytes(b"GET /a?b=1 HTTP/1.1\r\n\r\n".to_vec()).unwrap(),
            response: RecordedBody::from_bytes(WIRE.to_vec()).unwrap(),
            payload: Some(PayloadInfo {
                offset: (WIRE.len() - 6) as u64,
                digest: sha1_of(b"hello\n"),
            }),
        }
    }

    fn placement(length: u64) -> MemberPlacement {
        MemberPlacement {
            filename: "archive.warc.gz".to_owned(),
            offset: 123,
            length,
        }
    }

    #[test]
    fn response_member_yields_a_full_line() {
        let records = WarcBuilder::new(true)
            .build_transaction(capture(), DedupDecision::Write)
            .unwrap();

        let decoded = decode_member(&records[0].bytes).unwrap();
        let line = cdx_line(&decoded, &placement(records[0].bytes.len() as u64))
            .unwrap()
            .expect("response records are indexed");

        assert_eq!(line.key, "com,example)/a?b=1");
        assert_eq!(line.time, datetime!(2026-08-01 09:15:30 UTC));
        assert_eq!(line.block.url, "http://www.example.com/a?b=1");
        assert_eq!(line.block.status, Some(200));
        assert_eq!(line.block.mime.as_ref().unwrap().to_string(), "text/html");
        assert_eq!(line.block.digest, sha1_of(b"hello\n").to_string());
        assert_eq!(line.block.offset, 123);
        assert_eq!(line.block.filename, "archive.warc.gz");

        let rendered = line.to_line();
        assert!(rendered.starts_with("com,example)/a?b=1 20260801091530 {"));
    }

    #[test]
    fn request_members_are_not_indexed() {
        let records = WarcBuilder::new(true)
            .build_transaction(capture(), DedupDecision::Write)
            .unwrap();

        let decoded = decode_member(&records[1].bytes).unwrap();
        assert!(cdx_line(&decoded, &placement(0)).unwrap().is_none());
    }

    #[test]
    fn revisit_members_index_with_revisit_mime() {
        let records = WarcBuilder::new(true)
            .build_transaction(
                capture(),
                DedupDecision::Revisit {
                    url: "http://example.com/a?b=1".to_owned(),
                    date: datetime!(2026-07-30 00:00:00 UTC),
                },
            )
            .unwrap();

        let decoded = decode_member(&records[0].bytes).unwrap();
        let line = cdx_line(&decoded, &placement(0)).unwrap().unwrap();
        assert_eq!(line.block.mime.as_ref().unwrap().to_string(), "warc/revisit");
        assert_eq!(line.block.status, Some(200));
        assert_eq!(line.block.digest, sha1_of(b"hello\n").to_string());
    }

    #[test]
    fn member_iterator_walks_concatenated_gzip_members() {
        let records = WarcBuilder::new(true)
            .build_transaction(capture(), DedupDecision::Write)
            .unwrap();

        let mut blob = Vec::new();
        for record in &records {
            blob.extend_from_slice(&record.bytes);
        }

        let members: Vec<_> = members_of(&blob).collect::<ArchiveResult<_>>().unwrap();
        assert_eq!(members.len(), 2);

        let (first_offset, first_len, first_decoded) = &members[0];
        assert_eq!(*first_offset, 0);
        assert_eq!(*first_len, records[0].bytes.len() as u64);
        assert!(first_decoded.starts_with(b"WARC/1.0\r\n"));

        let (second_offset, _, second_decoded) = &members[1];
        assert_eq!(*second_offset, records[0].bytes.len() as u64);
        assert!(String::from_utf8_lossy(second_decoded).contains("WARC-Type: request"));
    }

    #[test]
    fn member_iterator_walks_plain_members_too() {
        let records = WarcBuilder::new(false)
            .build_transaction(capture(), DedupDecision::Write)
            .unwrap();

        let mut blob = Vec::new();
        for record in &records {
            blob.extend_from_slice(&record.bytes);
        }

        let members: Vec<_> = members_of(&blob).collect::<ArchiveResult<_>>().unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].2, records[0].bytes);
    }

    #[tokio::test]
    async fn index_member_appends_to_the_store() {
        use crate::store::{MemoryStore, OrderedStore};

        let store = Arc::new(MemoryStore::new());
        let indexer = CdxIndexer::new(Arc::clone(&store) as Arc<dyn OrderedStore>, "warc:cdxj");

        let records = WarcBuilder::new(true)
            .build_transaction(capture(), DedupDecision::Write)
            .unwrap();

        let indexed = indexer
            .index_member(&records[0].bytes, &placement(records[0].bytes.len() as u64))
            .await
            .unwrap();
        assert!(indexed);

        let skipped = indexer
            .index_member(&records[1].bytes, &placement(records[1].bytes.len() as u64))
            .await
            .unwrap();
        assert!(!skipped);

        let lines = store.range_all("warc:cdxj").await.unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("com,example)/a?b=1 "));
    }
}
