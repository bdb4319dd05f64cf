use crate::engine::{EngineConfig, IntegrityPolicy};
use clap::{self, Parser};
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

pub mod metainfo_file_path;
pub use metainfo_file_path::MetainfoFilePath;

#[derive(Parser, Debug)]
#[command(author, about, long_about = None)]
/// download a single file torrent (bittorrent v1) from the peers its tracker announces.
pub struct Cli {
    #[arg(required = true)]
    /// the source for the torrent information, i.e a torrent file.
    /// torrent files must have the .torrent extention
    pub source: MetainfoFilePath,

    #[arg(short, long, default_value_t = 6881)]
    /// the port announced to the tracker.
    pub port: u16,

    #[arg(short, long, default_value = "./downloads")]
    /// directory the downloaded file is written into, created if missing.
    pub output_dir: PathBuf,

    #[arg(long, default_value_t = 5)]
    pub connect_timeout_secs: u64,

    #[arg(long, value_enum, default_value_t = IntegrityPolicy::Abort)]
    /// what to do with a piece whose hash does not match.
    pub integrity_policy: IntegrityPolicy,

    #[arg(short, long, action = clap::ArgAction::Count)]
    /// -v for debug logs, -vv for trace logs.
    pub verbose: u8,
}

impl Cli {
    pub fn log_level(&self) -> Level {
        match self.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            integrity_policy: self.integrity_policy,
            ..EngineConfig::default()
        }
    }
}
