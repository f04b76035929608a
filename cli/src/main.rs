use std::error::Error;

use clap::{Parser, Subcommand};
use tracing::metadata::LevelFilter;

mod archive;
mod config;
mod index;

/// Level names accepted on the command line, mapped through tracing's own
/// `FromStr`.
pub(crate) fn parse_level(raw: &str) -> Result<LevelFilter, String> {
    raw.parse::<LevelFilter>()
        .map_err(|_| format!("unknown log level `{raw}` (off, error, warn, info, debug, trace)"))
}

#[derive(clap::Parser, Debug)]
#[command(version, about)]
struct Args {
    #[arg(long, default_value = "info", value_parser = parse_level)]
    log_level: LevelFilter,
    #[command(subcommand)]
    subcommand: LiverecSubcommand,
}

#[derive(Subcommand, Debug)]
enum LiverecSubcommand {
    /// Fetch urls under a capture scope and archive them.
    Archive(archive::ArchiveArgs),
    /// Rebuild index lines from existing archive files.
    Index(index::IndexArgs),
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let rt = tokio::runtime::Runtime::new()?;

    match args.subcommand {
        LiverecSubcommand::Archive(archive_args) => {
            rt.block_on(archive::run_archive(archive_args, args.log_level))
        }
        LiverecSubcommand::Index(index_args) => {
            rt.block_on(index::run_index(index_args, args.log_level))
        }
    }
}
