use neo_mime::MediaType;
use serde::{Deserialize, Serialize};
use time::{
    format_description::{well_known::Rfc3339, FormatItem},
    macros::format_description,
    OffsetDateTime, PrimitiveDateTime,
};

use crate::{LiverecError, LiverecResult};

/// 14-digit CDX timestamp, `YYYYMMDDHHMMSS`.
pub static CDX_TIMESTAMP_FMT: &[FormatItem<'_>] =
    format_description!("[year][month][day][hour repr:24][minute][second]");

pub fn cdx_timestamp(time: OffsetDateTime) -> String {
    time.format(CDX_TIMESTAMP_FMT)
        .unwrap_or_else(|_| String::from("00000000000000"))
}

pub fn parse_cdx_timestamp(raw: &str) -> LiverecResult<OffsetDateTime> {
    Ok(PrimitiveDateTime::parse(raw, CDX_TIMESTAMP_FMT)?.assume_utc())
}

/// WARC-Date form: RFC 3339 UTC at second precision.
pub fn warc_date(time: OffsetDateTime) -> String {
    let time = time.replace_nanosecond(0).unwrap_or(time);
    time.format(&Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

pub fn parse_warc_date(raw: &str) -> LiverecResult<OffsetDateTime> {
    Ok(OffsetDateTime::parse(raw, &Rfc3339)?)
}

/// One index line: `<urlkey> <timestamp> {json}`. The line itself is the
/// ordered-store member, so its lexicographic order is urlkey first,
/// timestamp second.
#[derive(Clone, Debug)]
pub struct CdxRecord {
    pub key: String,
    pub time: OffsetDateTime,
    pub block: CdxjBlock,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CdxjBlock {
    pub url: String,
    pub digest: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mime: Option<MediaType>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status: Option<u16>,
    pub length: u64,
    pub offset: u64,
    pub filename: String,
}

impl CdxRecord {
    pub fn to_line(&self) -> String {
        let mut out = String::with_capacity(256);
        out.push_str(&self.key);
        out.push(' ');
        out.push_str(&cdx_timestamp(self.time));
        out.push(' ');
        out.push_str(&serde_json::to_string(&self.block).unwrap_or_default());
        out
    }

    pub fn parse(line: &str) -> LiverecResult<CdxRecord> {
        let (key, rest) = line
            .split_once(' ')
            .ok_or(LiverecError::Cdxj("missing timestamp field"))?;
        let (timestamp, json) = rest
            .split_once(' ')
            .ok_or(LiverecError::Cdxj("missing json payload"))?;

        Ok(CdxRecord {
            key: key.to_owned(),
            time: parse_cdx_timestamp(timestamp)?,
            block: serde_json::from_str(json)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn record() -> CdxRecord {
        CdxRecord {
            key: "com,example)/".to_owned(),
            time: datetime!(2026-08-01 12:30:45 UTC),
            block: CdxjBlock {
                url: "http://example.com/".to_owned(),
                digest: "sha1:6VZNHFX25EQGMKDRJ6ZM4AHXF2KPEJMP".to_owned(),
                mime: MediaType::parse("text/html").ok(),
                status: Some(200),
                length: 512,
                offset: 1024,
                filename: "archive.warc.gz".to_owned(),
            },
        }
    }

    #[test]
    fn line_starts_with_key_and_timestamp() {
        let line = record().to_line();
        assert!(line.starts_with("com,example)/ 20260801123045 {"));
    }

    #[test]
    fn parse_round_trips() {
        let line = record().to_line();
        let parsed = CdxRecord::parse(&line).unwrap();
        assert_eq!(parsed.key, "com,example)/");
        assert_eq!(parsed.time, datetime!(2026-08-01 12:30:45 UTC));
        assert_eq!(parsed.block.url, "http://example.com/");
        assert_eq!(parsed.block.status, Some(200));
        assert_eq!(parsed.block.offset, 1024);
    }

    #[test]
    fn lines_sort_by_key_then_time() {
        let mut early = record();
        early.time = datetime!(2026-08-01 00:00:00 UTC);
        let late = record();

        assert!(early.to_line() < late.to_line());
    }

    #[test]
    fn warc_date_is_second_precision() {
        let time = datetime!(2026-08-01 12:30:45.987654 UTC);
        assert_eq!(warc_date(time), "2026-08-01T12:30:45Z");
        assert_eq!(
            parse_warc_date("2026-08-01T12:30:45Z").unwrap(),
            datetime!(2026-08-01 12:30:45 UTC)
        );
    }
}
