use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use liverec_archive::{
    store::{MemoryStore, OrderedStore, RedisStore},
    CdxIndexer,
};
use tracing::{info, metadata::LevelFilter, warn};
use tracing_subscriber::{filter::Targets, fmt::format, prelude::*};

use crate::config::FullConfig;

#[derive(clap::Args, Debug)]
pub(crate) struct IndexArgs {
    #[arg(short, long, help = "configuration file")]
    config: Option<PathBuf>,
    #[arg(help = "archive files to (re)index", required = true)]
    files: Vec<PathBuf>,
}

/// Offline reindex: the recovery path for index lines lost to store
/// failures while the archive itself made it to disk.
pub(crate) async fn run_index(
    args: IndexArgs,
    log_level: LevelFilter,
) -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer().event_format(
                format()
                    .pretty()
                    .with_line_number(false)
                    .with_source_location(false),
            ),
        )
        .with(Targets::new().with_default(log_level))
        .init();

    let cfg = FullConfig::load(args.config.as_deref()).await?;

    let store: Arc<dyn OrderedStore> = match cfg.archive.redis_url.as_deref() {
        Some(url) => Arc::new(RedisStore::connect(url).await?),
        None => {
            warn!("no store url configured; reindexing into a process-local store is a dry run");
            Arc::new(MemoryStore::new())
        }
    };

    let indexer = CdxIndexer::new(store, cfg.archive.index_key.clone());

    for file in &args.files {
        match indexer.index_file(file).await {
            Ok(count) => info!(file = %file.display(), count, "indexed"),
            Err(e) => warn!(file = %file.display(), error = %e, "reindex failed"),
        }
    }

    Ok(())
}
