use crate::metainfo::TorrentDescriptor;
use crate::peers::PieceIndex;
use crate::prelude::*;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("piece {index} is outside of the torrent")]
    UnknownPiece { index: PieceIndex },

    #[error("piece {index} has {len} bytes, expected {expected}")]
    LengthMismatch {
        index: PieceIndex,
        len: usize,
        expected: u64,
    },
}

/// the download target, pre-sized to the content length and written at piece offsets.
#[derive(Debug)]
pub struct OutputFile {
    file: File,
    path: PathBuf,
    piece_length: u64,
    total_length: u64,
}

impl OutputFile {
    #[instrument(level = "debug", skip(torrent), fields(total_length = torrent.total_length))]
    pub async fn create(path: &Path, torrent: &TorrentDescriptor) -> std::io::Result<Self> {
        let file = File::create(path).await?;
        file.set_len(torrent.total_length).await?;
        debug!("output file allocated");

        Ok(Self {
            file,
            path: path.to_path_buf(),
            piece_length: u64::from(torrent.piece_length),
            total_length: torrent.total_length,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn expected_len(&self, index: PieceIndex) -> Option<(u64, u64)> {
        let offset = (index as u64).checked_mul(self.piece_length)?;
        if offset >= self.total_length {
            return None;
        }
        Some((offset, self.piece_length.min(self.total_length - offset)))
    }

    /// writes a whole piece at `index * piece_length`, the payload must be exactly the piece.
    pub async fn write_piece(&mut self, index: PieceIndex, payload: &[u8]) -> Result<(), OutputError> {
        let (offset, expected) = self
            .expected_len(index)
            .ok_or(OutputError::UnknownPiece { index })?;

        if payload.len() as u64 != expected {
            return Err(OutputError::LengthMismatch {
                index,
                len: payload.len(),
                expected,
            });
        }

        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(payload).await?;
        self.file.flush().await?;
        trace!(index, offset, "piece written");

        Ok(())
    }

    pub async fn sync(&mut self) -> std::io::Result<()> {
        self.file.sync_all().await
    }
}
