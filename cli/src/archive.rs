use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{stream::FuturesUnordered, StreamExt};
use liverec_archive::{ArchiveWriter, SinkConfig};
use liverec_capture::{with_capture, CaptureClient, CaptureScope};
use tracing::{info, metadata::LevelFilter, warn};
use tracing_subscriber::{filter::Targets, fmt::format, prelude::*};
use url::Url;

use crate::config::FullConfig;

#[derive(clap::Args, Debug)]
pub(crate) struct ArchiveArgs {
    #[arg(short, long, help = "configuration file")]
    config: Option<PathBuf>,
    #[arg(short, long, help = "archive file; overrides the configured sink")]
    output: Option<PathBuf>,
    #[arg(
        long,
        help = "logging level for HTTP tasks",
        default_value = "warn",
        value_parser = crate::parse_level,
    )]
    http_log: LevelFilter,
    #[arg(help = "URLs to capture", required = true)]
    urls: Vec<String>,
}

pub(crate) async fn run_archive(
    args: ArchiveArgs,
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
        .with(
            Targets::new()
                .with_default(log_level)
                .with_target("liverec::http", args.http_log),
        )
        .init();

    let mut cfg = FullConfig::load(args.config.as_deref()).await?;
    if let Some(path) = args.output {
        cfg.archive.sink = SinkConfig::SingleFile { path };
    }

    let urls: Vec<Url> = args
        .urls
        .iter()
        .filter_map(|raw| match raw.parse::<Url>() {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(url = raw, error = %e, "skipping unparseable url");
                None
            }
        })
        .collect();

    let (writer, snapshotter) = ArchiveWriter::from_config(&cfg.archive).await?;
    let (handle, writer_task) = writer.spawn();

    let snapshot_task = snapshotter.map(|snapshotter| tokio::task::spawn(snapshotter.run()));

    let client = CaptureClient::new(&cfg.http)?;
    let scope = CaptureScope::with_settings(Arc::new(handle), cfg.http.capture_settings());

    with_capture(Arc::clone(&scope), async {
        let mut fetches = urls
            .iter()
            .map(|url| {
                let client = &client;
                async move {
                    match client.get(url).await {
                        Ok(response) => {
                            let status = response.status();
                            match hyper::body::to_bytes(response.into_body()).await {
                                Ok(body) => {
                                    info!(target: "liverec::http", url = %url, %status, bytes = body.len(), "fetched")
                                }
                                Err(e) => {
                                    warn!(target: "liverec::http", url = %url, error = %e, "body read failed")
                                }
                            }
                        }
                        Err(e) => warn!(target: "liverec::http", url = %url, error = %e, "fetch failed"),
                    }
                }
            })
            .collect::<FuturesUnordered<_>>();

        while fetches.next().await.is_some() {}
    })
    .await;

    // Late finalization tasks are still draining sockets and submitting to
    // the writer; wait until every recording has settled.
    let mut ticker = tokio::time::interval(Duration::from_millis(200));
    loop {
        ticker.tick().await;
        if scope.pending() == 0 {
            break;
        }
    }

    // The scope owns the last writer handle; dropping it lets the writer
    // drain its queue and stop.
    drop(scope);
    writer_task.join().await;

    if let Some(task) = snapshot_task {
        task.abort();
    }

    Ok(())
}
