use serde::{Deserialize, Serialize};

/// one entry of a multi-file torrent's `files` list.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileInfo {
    pub length: u64,
    pub path: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5sum: Option<String>,
}
