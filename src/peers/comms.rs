use super::{PieceIndex, PieceLength};
use crate::metainfo::PieceHash;
use sha1_smol::Sha1;
use std::fmt;
use std::net::SocketAddrV4;

/// one piece of the target file, identified by its index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceDescriptor {
    pub index: PieceIndex,
    pub length: PieceLength,
    pub hash: PieceHash,
}

impl PieceDescriptor {
    pub fn new(index: PieceIndex, length: PieceLength, hash: PieceHash) -> Self {
        Self {
            index,
            length,
            hash,
        }
    }

    pub fn matches_hash(&self, payload: &[u8]) -> bool {
        Sha1::from(payload).digest().bytes() == self.hash
    }
}

/// a peer as announced by the tracker, `id` is its position in the announced list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerDescriptor {
    pub addr: SocketAddrV4,
    pub id: usize,
}

impl PeerDescriptor {
    pub fn new(addr: SocketAddrV4, id: usize) -> Self {
        Self { addr, id }
    }
}

impl fmt::Display for PeerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.id, self.addr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceOutcome {
    Downloaded,
    PeerMissingPiece,
    IntegrityFailure,
    TransportFailure,
}

impl fmt::Display for PieceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Downloaded => "downloaded",
            Self::PeerMissingPiece => "peer missing piece",
            Self::IntegrityFailure => "integrity failure",
            Self::TransportFailure => "transport failure",
        };
        f.write_str(name)
    }
}

/// what a worker hands to the collector for one assignment attempt.
#[derive(Debug)]
pub struct PieceResult {
    pub index: PieceIndex,
    pub payload: Option<Vec<u8>>,
    pub outcome: PieceOutcome,
    pub peer: PeerDescriptor,
}

impl PieceResult {
    pub fn downloaded(index: PieceIndex, payload: Vec<u8>, peer: PeerDescriptor) -> Self {
        Self {
            index,
            payload: Some(payload),
            outcome: PieceOutcome::Downloaded,
            peer,
        }
    }

    pub fn failed(index: PieceIndex, outcome: PieceOutcome, peer: PeerDescriptor) -> Self {
        Self {
            index,
            payload: None,
            outcome,
            peer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn test_matches_hash() {
        let payload = b"some piece bytes".to_vec();
        let hash = Sha1::from(&payload).digest().bytes();
        let piece = PieceDescriptor::new(0, payload.len() as u32, hash);

        assert!(piece.matches_hash(&payload));
        assert!(!piece.matches_hash(b"some piece byteZ"));
    }
}
