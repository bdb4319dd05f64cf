pub mod download_info;
pub mod fileinfo;
pub mod tracker_url;

pub use download_info::{DownloadInfo, TorrentDescriptor};
pub use fileinfo::FileInfo;
pub use tracker_url::TrackerUrl;

use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use tokio::fs;

pub type PieceHash = [u8; sha1_smol::DIGEST_LENGTH];

#[derive(Debug, Deserialize)]
pub struct Metainfo {
    #[serde(default)]
    pub announce: Option<TrackerUrl>,

    #[serde(rename = "info")]
    pub download_info: DownloadInfo,

    #[serde(default)]
    #[serde(rename = "announce-list")]
    pub announce_list: Option<Vec<Vec<String>>>,

    #[serde(default)]
    #[serde(rename = "creation date")]
    pub creation_date: Option<u64>, // seconds since unix epoch

    #[serde(default)]
    #[serde(rename = "created by")]
    pub created_by: Option<String>,

    #[serde(default)]
    pub comment: Option<String>,

    #[serde(default)]
    pub encoding: Option<String>,
}

impl Metainfo {
    pub async fn from_bencode_file(file: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = file.as_ref();
        let file_contents = fs::read(path)
            .await
            .with_context(|| format!("reading torrent file {}", path.display()))?;
        Self::from_bytes(&file_contents)
    }

    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        serde_bencode::from_bytes(bytes).map_err(anyhow::Error::msg)
    }

    /// the `announce` url, or the first tracker of the first `announce-list` tier.
    pub fn tracker_url(&self) -> anyhow::Result<TrackerUrl> {
        if let Some(url) = &self.announce {
            return Ok(url.clone());
        }

        let first = self
            .announce_list
            .iter()
            .flatten()
            .flatten()
            .next()
            .context("torrent has neither announce nor announce-list")?;
        TrackerUrl::new(first.as_str())
    }
}
