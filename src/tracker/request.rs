use crate::torrent::{InfoHash, PeerId};
use form_urlencoded::byte_serialize;

#[derive(Debug, Clone)]
pub struct TrackerRequest {
    /// sha1 hash of the info dictionary, sent as raw url encoded bytes.
    pub info_hash: InfoHash,

    /// our peer id, 20 bytes.
    pub peer_id: PeerId,

    /// port we claim to listen on
    pub port: u16,

    /// total amount uploaded, start with 0.
    pub uploaded: u64,

    /// total amount downloaded, start with 0
    pub downloaded: u64,

    /// total amount left in the file, set to file size in bytes.
    pub left: u64,

    /// always ask for the compact peer list.
    compact: u8,
}

impl TrackerRequest {
    pub fn from_parts(info_hash: InfoHash, peer_id: PeerId, port: u16, left: u64) -> Self {
        Self {
            info_hash,
            peer_id,
            port,
            uploaded: 0,
            downloaded: 0,
            left,
            compact: 1,
        }
    }

    fn encode_pairs<I, A, B>(pairs: I) -> String
    where
        I: IntoIterator<Item = (A, B)>,
        A: AsRef<[u8]>,
        B: AsRef<[u8]>,
    {
        let mut query = String::new();
        for (position, (key, value)) in pairs.into_iter().enumerate() {
            if position > 0 {
                query.push('&');
            }
            Self::write_pair(&mut query, key.as_ref(), value.as_ref());
        }
        query
    }

    fn write_pair(query: &mut String, key: &[u8], value: &[u8]) {
        query.extend(byte_serialize(key));
        query.push('=');
        query.extend(byte_serialize(value));
    }

    pub fn to_url_query(&self) -> String {
        let pairs: [(&str, Vec<u8>); 7] = [
            ("compact", self.compact.to_string().into_bytes()),
            ("downloaded", self.downloaded.to_string().into_bytes()),
            ("info_hash", self.info_hash.as_ref().to_vec()),
            ("left", self.left.to_string().into_bytes()),
            ("peer_id", self.peer_id.as_ref().to_vec()),
            ("port", self.port.to_string().into_bytes()),
            ("uploaded", self.uploaded.to_string().into_bytes()),
        ];
        Self::encode_pairs(pairs)
    }
}
