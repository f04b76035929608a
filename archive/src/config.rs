use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Scratch directory for per-record and staged members.
    #[serde(default = "default_tmp_rec_dir")]
    pub tmp_rec_dir: PathBuf,
    /// Ordered-store connection; a process-local store is used when absent.
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_ipfs_host")]
    pub ipfs_host: String,
    #[serde(default = "default_ipfs_port")]
    pub ipfs_port: u16,
    #[serde(default = "default_true")]
    pub gzip: bool,
    #[serde(default)]
    pub dedup: bool,
    /// With dedup on, drop duplicate payloads entirely instead of writing
    /// revisit records.
    #[serde(default)]
    pub skip_duplicates: bool,
    #[serde(default = "default_index_key")]
    pub index_key: String,
    #[serde(default)]
    pub sink: SinkConfig,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        ArchiveConfig {
            tmp_rec_dir: default_tmp_rec_dir(),
            redis_url: None,
            ipfs_host: default_ipfs_host(),
            ipfs_port: default_ipfs_port(),
            gzip: true,
            dedup: false,
            skip_duplicates: false,
            index_key: default_index_key(),
            sink: SinkConfig::default(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum SinkConfig {
    /// Everything appended to one archive file.
    SingleFile { path: PathBuf },
    /// One `<uuid>.warc.gz` per record under `tmp_rec_dir`.
    PerRecord,
    /// Members shipped to the content-addressed store.
    ContentAddressed,
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig::SingleFile {
            path: PathBuf::from("archive.warc.gz"),
        }
    }
}

fn default_tmp_rec_dir() -> PathBuf {
    PathBuf::from("/tmp/rec")
}

fn default_ipfs_host() -> String {
    String::from("localhost")
}

fn default_ipfs_port() -> u16 {
    5001
}

fn default_true() -> bool {
    true
}

fn default_index_key() -> String {
    String::from("warc:cdxj")
}
