use super::{FileInfo, PieceHash};
use crate::peers::{PieceDescriptor, PieceLength};
use crate::torrent::InfoHash;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use sha1_smol::Sha1;

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum DownloadInfo {
    MultiFile {
        #[serde(rename = "name")]
        dirname: String,

        files: Vec<FileInfo>,

        #[serde(rename = "piece length")]
        piece_length: u64,

        #[serde(with = "piece_hashes_parser")]
        pieces: Vec<PieceHash>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        private: Option<i64>,
    },

    SingleFile {
        #[serde(rename = "name")]
        filename: String,
        length: u64,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        md5sum: Option<String>,

        #[serde(rename = "piece length")]
        piece_length: u64,

        #[serde(with = "piece_hashes_parser")]
        pieces: Vec<PieceHash>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        private: Option<i64>,
    },
}

impl DownloadInfo {
    /// sha1 of the bencoded info dictionary, identifies the torrent to peers and trackers.
    pub fn info_hash(&self) -> anyhow::Result<InfoHash> {
        let info_bytes = serde_bencode::to_bytes(self)?;
        Ok(InfoHash::new(Sha1::from(info_bytes).digest().bytes()))
    }

    pub fn total_length(&self) -> u64 {
        match self {
            Self::SingleFile { length, .. } => *length,
            Self::MultiFile { files, .. } => files.iter().map(|file| file.length).sum(),
        }
    }

    /// everything the download engine needs to know about the content.
    pub fn torrent_descriptor(&self) -> anyhow::Result<TorrentDescriptor> {
        match self {
            Self::SingleFile {
                filename,
                length,
                piece_length,
                pieces,
                ..
            } => {
                let piece_length = PieceLength::try_from(*piece_length)
                    .context("piece length does not fit in 32 bits")?;
                TorrentDescriptor::new(
                    self.info_hash()?,
                    pieces.clone(),
                    piece_length,
                    *length,
                    filename.clone(),
                )
            }
            Self::MultiFile { dirname, .. } => {
                anyhow::bail!("multi-file torrent {dirname:?} is not supported, only single files")
            }
        }
    }
}

/// the boundary between torrent metadata and the download engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentDescriptor {
    pub info_hash: InfoHash,
    pub piece_hashes: Vec<PieceHash>,
    pub piece_length: PieceLength,
    pub total_length: u64,
    pub suggested_file_name: String,
}

impl TorrentDescriptor {
    pub fn new(
        info_hash: InfoHash,
        piece_hashes: Vec<PieceHash>,
        piece_length: PieceLength,
        total_length: u64,
        suggested_file_name: String,
    ) -> anyhow::Result<Self> {
        if piece_length == 0 {
            anyhow::bail!("piece length must be positive");
        }
        if total_length == 0 {
            anyhow::bail!("torrent content is empty");
        }

        let expected_pieces = total_length.div_ceil(u64::from(piece_length));
        if piece_hashes.len() as u64 != expected_pieces {
            anyhow::bail!(
                "torrent has {} piece hashes but {} bytes in pieces of {} needs {}",
                piece_hashes.len(),
                total_length,
                piece_length,
                expected_pieces
            );
        }

        Ok(Self {
            info_hash,
            piece_hashes,
            piece_length,
            total_length,
            suggested_file_name,
        })
    }

    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }

    /// byte offset of a piece in the output file.
    pub fn piece_offset(&self, index: usize) -> u64 {
        index as u64 * u64::from(self.piece_length)
    }

    /// every piece in index order, the last one bounded by the total length.
    pub fn pieces(&self) -> Vec<PieceDescriptor> {
        self.piece_hashes
            .iter()
            .enumerate()
            .map(|(index, hash)| {
                let remaining = self.total_length - self.piece_offset(index);
                // remaining > 0 for every index, checked in new.
                let length = remaining.min(u64::from(self.piece_length)) as PieceLength;
                PieceDescriptor::new(index, length, *hash)
            })
            .collect()
    }
}

mod piece_hashes_parser {
    use crate::metainfo::PieceHash;
    use serde::de::{self, Visitor};
    use static_str_ops::static_format;
    const HASH_SIZE: usize = std::mem::size_of::<PieceHash>();

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<PieceHash>, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_bytes(PieceHashVisitor)
    }

    pub fn serialize<S>(piece_hashes: &[PieceHash], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serde_bytes::serialize(&piece_hashes.concat(), serializer)
    }

    struct PieceHashVisitor;
    impl<'de> Visitor<'de> for PieceHashVisitor {
        type Value = Vec<PieceHash>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str(static_format!(
                "a byte sequence whose length is a multiple of {}",
                HASH_SIZE
            ))
        }

        fn visit_bytes<E>(self, bytes: &[u8]) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            let chunks = bytes.chunks_exact(HASH_SIZE);

            if !chunks.remainder().is_empty() {
                return Err(E::custom(static_format!(
                    "piece hashes should be a multiple of length {}",
                    HASH_SIZE
                )));
            }

            let piece_hashes = chunks
                .map(|chunk| {
                    let mut hash = [0u8; HASH_SIZE];
                    hash.copy_from_slice(chunk);
                    hash
                })
                .collect();

            Ok(piece_hashes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn descriptor() -> TorrentDescriptor {
        let hashes = (0..3u8).map(|i| [i; 20]).collect();
        TorrentDescriptor::new(InfoHash::new([0; 20]), hashes, 100, 250, "file.bin".into())
            .unwrap()
    }

    #[rstest]
    fn test_pieces_last_piece_is_shorter(descriptor: TorrentDescriptor) {
        let pieces = descriptor.pieces();
        let lengths: Vec<_> = pieces.iter().map(|piece| piece.length).collect();
        assert_eq!(lengths, vec![100, 100, 50]);
        assert_eq!(pieces[2].hash, [2; 20]);
        assert_eq!(descriptor.piece_offset(2), 200);
    }

    #[rstest]
    #[case(100, 300, 3, true)]
    #[case(100, 201, 3, true)]
    #[case(100, 301, 3, false)]
    #[case(100, 199, 3, false)]
    #[case(0, 100, 1, false)]
    fn test_hash_count_must_match_length(
        #[case] piece_length: u32,
        #[case] total: u64,
        #[case] hashes: usize,
        #[case] valid: bool,
    ) {
        let result = TorrentDescriptor::new(
            InfoHash::new([0; 20]),
            vec![[0; 20]; hashes],
            piece_length,
            total,
            "x".into(),
        );
        assert_eq!(result.is_ok(), valid);
    }

    #[rstest]
    fn test_single_file_info_roundtrips_through_bencode() {
        let pieces: Vec<u8> = [[1u8; 20], [2u8; 20]].concat();
        let mut encoded = b"d6:lengthi40000e4:name8:file.bin12:piece lengthi32768e6:pieces40:".to_vec();
        encoded.extend_from_slice(&pieces);
        encoded.push(b'e');

        let info: DownloadInfo = serde_bencode::from_bytes(&encoded).unwrap();
        assert_eq!(serde_bencode::to_bytes(&info).unwrap(), encoded);

        let expected_hash = InfoHash::new(Sha1::from(&encoded).digest().bytes());
        let descriptor = info.torrent_descriptor().unwrap();
        assert_eq!(descriptor.info_hash, expected_hash);
        assert_eq!(descriptor.piece_count(), 2);
        assert_eq!(descriptor.pieces()[1].length, 40000 - 32768);
        assert_eq!(descriptor.suggested_file_name, "file.bin");
    }

    #[rstest]
    fn test_rejects_ragged_piece_hashes() {
        let mut encoded = b"d6:lengthi1e4:name1:a12:piece lengthi1e6:pieces3:".to_vec();
        encoded.extend_from_slice(&[0, 1, 2]);
        encoded.push(b'e');

        assert!(serde_bencode::from_bytes::<DownloadInfo>(&encoded).is_err());
    }
}
