use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::error;

use crate::{ipfs::IpfsClient, warc::SerializedRecord, ArchiveResult};

/// Where a member landed: the name the index will reference it by, and its
/// extent within that name.
#[derive(Clone, Debug)]
pub struct MemberPlacement {
    pub filename: String,
    pub offset: u64,
    pub length: u64,
}

/// Destination strategy for serialized members. One transaction's records
/// arrive together and in order; the returned placements align with the
/// input, `None` marking a member the sink dropped (reported, not retried).
#[async_trait]
pub trait RecordSink: Send {
    async fn put_members(
        &mut self,
        records: &[SerializedRecord],
    ) -> ArchiveResult<Vec<Option<MemberPlacement>>>;
}

/// Appends every member to one growing archive file. The file handle is
/// opened per transaction and closed before the next one may append, so a
/// crash never leaves a half-owned descriptor.
pub struct SingleFileSink {
    path: PathBuf,
    filename: String,
}

impl SingleFileSink {
    pub fn new(path: impl AsRef<Path>) -> SingleFileSink {
        let path = path.as_ref().to_path_buf();
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        SingleFileSink { path, filename }
    }
}

#[async_trait]
impl RecordSink for SingleFileSink {
    async fn put_members(
        &mut self,
        records: &[SerializedRecord],
    ) -> ArchiveResult<Vec<Option<MemberPlacement>>> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut placements = Vec::with_capacity(records.len());
        for record in records {
            let offset = file.seek(SeekFrom::End(0))?;
            file.write_all(&record.bytes)?;
            placements.push(Some(MemberPlacement {
                filename: self.filename.clone(),
                offset,
                length: record.bytes.len() as u64,
            }));
        }

        file.flush()?;
        file.sync_data()?;

        Ok(placements)
    }
}

/// One file per record under a scratch directory, named by the record's
/// uuid.
pub struct PerRecordSink {
    dir: PathBuf,
    suffix: &'static str,
}

impl PerRecordSink {
    pub fn new(dir: impl AsRef<Path>, gzip: bool) -> ArchiveResult<PerRecordSink> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        Ok(PerRecordSink {
            dir,
            suffix: if gzip { ".warc.gz" } else { ".warc" },
        })
    }
}

#[async_trait]
impl RecordSink for PerRecordSink {
    async fn put_members(
        &mut self,
        records: &[SerializedRecord],
    ) -> ArchiveResult<Vec<Option<MemberPlacement>>> {
        let mut placements = Vec::with_capacity(records.len());
        for record in records {
            let filename = format!("{}{}", record.id.hyphenated(), self.suffix);
            std::fs::write(self.dir.join(&filename), &record.bytes)?;
            placements.push(Some(MemberPlacement {
                filename,
                offset: 0,
                length: record.bytes.len() as u64,
            }));
        }

        Ok(placements)
    }
}

/// Stages each member in a temp file, ships it to the content-addressed
/// store, and names it by the resulting address. A failed put drops that
/// member's entry; there is no retry.
pub struct ContentAddressedSink {
    ipfs: IpfsClient,
    tmp_dir: PathBuf,
}

impl ContentAddressedSink {
    pub fn new(ipfs: IpfsClient, tmp_dir: impl AsRef<Path>) -> ArchiveResult<ContentAddressedSink> {
        let tmp_dir = tmp_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&tmp_dir)?;

        Ok(ContentAddressedSink { ipfs, tmp_dir })
    }
}

#[async_trait]
impl RecordSink for ContentAddressedSink {
    async fn put_members(
        &mut self,
        records: &[SerializedRecord],
    ) -> ArchiveResult<Vec<Option<MemberPlacement>>> {
        let mut placements = Vec::with_capacity(records.len());

        for record in records {
            let name = format!("{}.warc.gz", record.id.hyphenated());

            let mut staged = tempfile::NamedTempFile::new_in(&self.tmp_dir)?;
            staged.write_all(&record.bytes)?;
            staged.flush()?;

            let body = std::fs::read(staged.path())?;
            match self.ipfs.put(&name, body).await {
                Ok(hash) => placements.push(Some(MemberPlacement {
                    filename: format!("ipfs://{hash}"),
                    offset: 0,
                    length: record.bytes.len() as u64,
                })),
                Err(e) => {
                    error!(record = %record.id, error = %e, "content-addressed put failed; dropping entry");
                    placements.push(None);
                }
            }
            // `staged` drops here, deleting the temp file.
        }

        Ok(placements)
    }
}
