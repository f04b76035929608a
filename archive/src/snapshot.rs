use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::{ipfs::IpfsClient, store::OrderedStore, ArchiveResult};

pub const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(30);

/// Periodically publishes the whole index as one content-addressed
/// `index.cdxj` blob. Stateless between ticks: a failed tick just logs and
/// the next one rebuilds from scratch.
pub struct IndexSnapshotter {
    store: Arc<dyn OrderedStore>,
    key: String,
    ipfs: IpfsClient,
    interval: Duration,
}

impl IndexSnapshotter {
    pub fn new(
        store: Arc<dyn OrderedStore>,
        key: impl Into<String>,
        ipfs: IpfsClient,
    ) -> IndexSnapshotter {
        IndexSnapshotter {
            store,
            key: key.into(),
            ipfs,
            interval: SNAPSHOT_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> IndexSnapshotter {
        self.interval = interval;
        self
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match self.snapshot().await {
                Ok(address) => info!(address, "published index snapshot"),
                Err(e) => warn!(error = %e, "index snapshot failed; retrying next tick"),
            }
        }
    }

    /// One full pass: every CDXJ member, newline-joined, pushed and
    /// republished under the stable name.
    pub async fn snapshot(&self) -> ArchiveResult<String> {
        let members = self.store.range_all(&self.key).await?;

        let mut blob = String::with_capacity(members.iter().map(|m| m.len() + 1).sum());
        for member in members {
            blob.push_str(&member);
            blob.push('\n');
        }

        let address = self.ipfs.put("index.cdxj", blob.into_bytes()).await?;
        self.ipfs.publish_name(&address).await?;
        Ok(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn snapshot_concatenates_members_in_order() {
        let store = Arc::new(MemoryStore::new());
        store.append("warc:cdxj", "b second").await.unwrap();
        store.append("warc:cdxj", "a first").await.unwrap();

        let members = store.range_all("warc:cdxj").await.unwrap();
        let blob: String = members.iter().map(|m| format!("{m}\n")).collect();
        assert_eq!(blob, "a first\nb second\n");
    }
}
