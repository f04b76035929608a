use std::sync::Arc;

use liverec_common::{surt, surt_range, CdxRecord, Sha1Digest};
use time::OffsetDateTime;
use tracing::warn;
use url::Url;

use crate::store::OrderedStore;

/// What the builder should do with a response payload.
#[derive(Clone, Debug)]
pub enum DedupDecision {
    /// No prior copy known; write the full response record.
    Write,
    /// Duplicate and configured to not record duplicates at all.
    Skip,
    /// Duplicate payload; write a revisit referencing the original.
    Revisit { url: String, date: OffsetDateTime },
}

/// Payload-digest lookup against the CDXJ index. Fail-open: any store
/// trouble degrades to `Write`, trading a duplicate record for a missed
/// one.
pub struct DedupResolver {
    store: Arc<dyn OrderedStore>,
    key: String,
    enabled: bool,
    skip_duplicates: bool,
}

impl DedupResolver {
    pub fn new(
        store: Arc<dyn OrderedStore>,
        key: impl Into<String>,
        enabled: bool,
        skip_duplicates: bool,
    ) -> DedupResolver {
        DedupResolver {
            store,
            key: key.into(),
            enabled,
            skip_duplicates,
        }
    }

    pub async fn lookup(&self, digest: Option<&Sha1Digest>, url: &Url) -> DedupDecision {
        if !self.enabled {
            return DedupDecision::Write;
        }
        let Some(digest) = digest else {
            return DedupDecision::Write;
        };

        let urlkey = surt(url);
        let (start, end) = surt_range(&urlkey);

        let members = match self
            .store
            .range_by_lex(&self.key, &format!("[{start}"), &format!("({end}"))
            .await
        {
            Ok(members) => members,
            Err(e) => {
                warn!(url = %url, error = %e, "dedup lookup failed; writing anyway");
                return DedupDecision::Write;
            }
        };

        // Members come back in lexicographic order, so the first digest
        // match is the earliest capture for this key.
        for line in members {
            let Ok(entry) = CdxRecord::parse(&line) else {
                continue;
            };
            if digest.matches(&entry.block.digest) {
                if self.skip_duplicates {
                    return DedupDecision::Skip;
                }
                return DedupDecision::Revisit {
                    url: entry.block.url,
                    date: entry.time,
                };
            }
        }

        DedupDecision::Write
    }
}
