use std::sync::Arc;

use async_trait::async_trait;
use liverec_common::{CaptureSink, FinishedCapture};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, Instrument};

use crate::{
    cdxj::CdxIndexer,
    config::{ArchiveConfig, SinkConfig},
    dedup::DedupResolver,
    ipfs::IpfsClient,
    sink::{ContentAddressedSink, PerRecordSink, RecordSink, SingleFileSink},
    snapshot::IndexSnapshotter,
    store::{MemoryStore, OrderedStore, RedisStore},
    warc::WarcBuilder,
    ArchiveResult,
};

pub enum ArchiveJob {
    Capture(FinishedCapture),
    Metadata {
        url: String,
        content_type: String,
        data: Vec<u8>,
    },
}

struct Submission {
    job: ArchiveJob,
    ack: oneshot::Sender<ArchiveResult<()>>,
}

/// Owns the whole write path for one archive: dedup consult, record
/// serialization, sink placement, index append. [`spawn`] moves it onto its
/// own task so sink appends from concurrent captures never interleave.
///
/// [`spawn`]: ArchiveWriter::spawn
pub struct ArchiveWriter {
    builder: WarcBuilder,
    sink: Box<dyn RecordSink>,
    dedup: DedupResolver,
    indexer: CdxIndexer,
}

impl ArchiveWriter {
    pub fn new(
        builder: WarcBuilder,
        sink: Box<dyn RecordSink>,
        dedup: DedupResolver,
        indexer: CdxIndexer,
    ) -> ArchiveWriter {
        ArchiveWriter {
            builder,
            sink,
            dedup,
            indexer,
        }
    }

    /// Wires a writer from configuration, along with the snapshotter when
    /// the content-addressed sink is selected.
    pub async fn from_config(
        config: &ArchiveConfig,
    ) -> ArchiveResult<(ArchiveWriter, Option<IndexSnapshotter>)> {
        let store: Arc<dyn OrderedStore> = match config.redis_url.as_deref() {
            Some(url) => Arc::new(RedisStore::connect(url).await?),
            None => {
                info!("no store url configured; index is process-local");
                Arc::new(MemoryStore::new())
            }
        };

        let ipfs = IpfsClient::new(&config.ipfs_host, config.ipfs_port);

        let (sink, snapshotter): (Box<dyn RecordSink>, Option<IndexSnapshotter>) =
            match &config.sink {
                SinkConfig::SingleFile { path } => (Box::new(SingleFileSink::new(path)), None),
                SinkConfig::PerRecord => (
                    Box::new(PerRecordSink::new(&config.tmp_rec_dir, config.gzip)?),
                    None,
                ),
                SinkConfig::ContentAddressed => (
                    Box::new(ContentAddressedSink::new(
                        ipfs.clone(),
                        &config.tmp_rec_dir,
                    )?),
                    Some(IndexSnapshotter::new(
                        Arc::clone(&store),
                        config.index_key.clone(),
                        ipfs,
                    )),
                ),
            };

        let writer = ArchiveWriter::new(
            WarcBuilder::new(config.gzip),
            sink,
            DedupResolver::new(
                Arc::clone(&store),
                config.index_key.clone(),
                config.dedup,
                config.skip_duplicates,
            ),
            CdxIndexer::new(store, config.index_key.clone()),
        );

        Ok((writer, snapshotter))
    }

    /// Moves the writer onto its own task and returns the submission handle
    /// plus the task owner. The task ends once every handle is dropped and
    /// the queue has drained.
    pub fn spawn(self) -> (ArchiveHandle, ArchiveTask) {
        let (tx, rx) = flume::bounded(256);

        let worker = tokio::spawn(
            self.run(rx)
                .instrument(info_span!(target: "liverec::archive", "archive_writer")),
        );

        (ArchiveHandle { tx }, ArchiveTask { worker })
    }

    async fn run(mut self, rx: flume::Receiver<Submission>) {
        while let Ok(Submission { job, ack }) = rx.recv_async().await {
            let _ = ack.send(self.process(job).await);
        }
    }

    pub async fn process(&mut self, job: ArchiveJob) -> ArchiveResult<()> {
        let records = match job {
            ArchiveJob::Capture(capture) => {
                let decision = self
                    .dedup
                    .lookup(
                        capture.payload.as_ref().map(|p| &p.digest),
                        &capture.url,
                    )
                    .await;
                debug!(url = %capture.url, decision = ?decision, "archiving capture");
                self.builder.build_transaction(capture, decision)?
            }
            ArchiveJob::Metadata {
                url,
                content_type,
                data,
            } => vec![self.builder.metadata_record(&url, &content_type, &data)?],
        };

        if records.is_empty() {
            return Ok(());
        }

        let placements = self.sink.put_members(&records).await?;

        for (record, placement) in records.iter().zip(placements) {
            let Some(placement) = placement else {
                continue;
            };
            // The member is already durable; a failed index append is
            // recoverable offline, so it must not fail the transaction.
            let _ = self.indexer.index_member(&record.bytes, &placement).await;
        }

        Ok(())
    }
}

/// Capture-side handle to a running writer. Implements the sink the capture
/// layer hands finished transactions to; failures are logged and die here,
/// never in the HTTP caller.
#[derive(Clone)]
pub struct ArchiveHandle {
    tx: flume::Sender<Submission>,
}

impl ArchiveHandle {
    /// Queues one job and waits for the writer to finish it.
    pub async fn submit(&self, job: ArchiveJob) -> ArchiveResult<()> {
        let (ack_tx, ack_rx) = oneshot::channel();

        if self
            .tx
            .send_async(Submission { job, ack: ack_tx })
            .await
            .is_err()
        {
            error!("archive writer is gone; job dropped");
            return Ok(());
        }

        match ack_rx.await {
            Ok(result) => result,
            Err(_) => {
                error!("archive writer stopped mid-job");
                Ok(())
            }
        }
    }

    /// Injects a caller-supplied metadata record.
    pub async fn metadata(
        &self,
        url: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> ArchiveResult<()> {
        self.submit(ArchiveJob::Metadata {
            url: url.into(),
            content_type: content_type.into(),
            data,
        })
        .await
    }
}

#[async_trait]
impl CaptureSink for ArchiveHandle {
    async fn accept(&self, capture: FinishedCapture) {
        let url = capture.url.clone();
        if let Err(e) = self.submit(ArchiveJob::Capture(capture)).await {
            error!(url = %url, error = %e, "failed to archive capture");
        }
    }
}

/// Owner of the spawned writer task.
pub struct ArchiveTask {
    worker: JoinHandle<()>,
}

impl ArchiveTask {
    /// Waits for the writer to drain its queue and stop. Only resolves once
    /// every [`ArchiveHandle`] clone has been dropped.
    pub async fn join(self) {
        let _ = self.worker.await;
    }
}
