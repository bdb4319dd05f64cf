use crate::peers::{HandshakeMismatch, PeerError};
use crate::prelude::*;
use crate::torrent::{InfoHash, PeerId};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// the fixed 68 byte exchange that opens every peer connection.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerHandshake {
    protocol_name_length: u8,
    protocol_name: [u8; Self::PROTOCOL_NAME_SIZE],
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
}

pub type HandshakeBytes = [u8; PeerHandshake::HANDSHAKE_SIZE];

impl PeerHandshake {
    pub const PROTOCOL_NAME: [u8; 19] = *b"BitTorrent protocol";
    const PROTOCOL_NAME_SIZE: usize = Self::PROTOCOL_NAME.len();
    const RESERVED_SIZE: usize = 8;
    pub const HANDSHAKE_SIZE: usize = 1
        + Self::PROTOCOL_NAME_SIZE
        + Self::RESERVED_SIZE
        + InfoHash::INFO_HASH_SIZE
        + PeerId::PEER_ID_SIZE;

    const INFO_HASH_OFFSET: usize = 1 + Self::PROTOCOL_NAME_SIZE + Self::RESERVED_SIZE;
    const PEER_ID_OFFSET: usize = Self::INFO_HASH_OFFSET + InfoHash::INFO_HASH_SIZE;

    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        Self {
            protocol_name_length: Self::PROTOCOL_NAME_SIZE as u8,
            protocol_name: Self::PROTOCOL_NAME,
            info_hash,
            peer_id,
        }
    }

    pub fn protocol_name(&self) -> String {
        let len = usize::from(self.protocol_name_length).min(Self::PROTOCOL_NAME_SIZE);
        String::from_utf8_lossy(&self.protocol_name[..len]).into_owned()
    }

    /// parses any 68 bytes, the protocol name is only checked by [`PeerHandshake::verify`].
    pub fn from_bytes(bytes: &HandshakeBytes) -> Self {
        let mut protocol_name = [0u8; Self::PROTOCOL_NAME_SIZE];
        protocol_name.copy_from_slice(&bytes[1..=Self::PROTOCOL_NAME_SIZE]);

        let mut info_hash = [0u8; InfoHash::INFO_HASH_SIZE];
        info_hash.copy_from_slice(&bytes[Self::INFO_HASH_OFFSET..Self::PEER_ID_OFFSET]);

        let mut peer_id = [0u8; PeerId::PEER_ID_SIZE];
        peer_id.copy_from_slice(&bytes[Self::PEER_ID_OFFSET..]);

        Self {
            protocol_name_length: bytes[0],
            protocol_name,
            info_hash: InfoHash::new(info_hash),
            peer_id: PeerId::new(peer_id),
        }
    }

    pub fn to_bytes(&self) -> HandshakeBytes {
        let mut bytes = [0u8; Self::HANDSHAKE_SIZE];
        bytes[0] = self.protocol_name_length;
        bytes[1..=Self::PROTOCOL_NAME_SIZE].copy_from_slice(&self.protocol_name);
        // reserved bytes stay zero, no extensions are advertised.
        bytes[Self::INFO_HASH_OFFSET..Self::PEER_ID_OFFSET].copy_from_slice(self.info_hash.as_ref());
        bytes[Self::PEER_ID_OFFSET..].copy_from_slice(self.peer_id.as_ref());
        bytes
    }

    /// checks that `received` speaks the same protocol about the same torrent, peer ids are
    /// expected to differ.
    pub fn verify(&self, received: &PeerHandshake) -> Result<(), HandshakeMismatch> {
        if self.protocol_name_length != received.protocol_name_length
            || self.protocol_name != received.protocol_name
        {
            return Err(HandshakeMismatch::Protocol {
                expected: self.protocol_name(),
                received: received.protocol_name(),
            });
        }

        if self.info_hash != received.info_hash {
            return Err(HandshakeMismatch::InfoHash);
        }

        Ok(())
    }
}

pub async fn send_handshake<W>(
    stream: &mut W,
    info_hash: InfoHash,
    self_id: PeerId,
) -> Result<PeerHandshake, PeerError>
where
    W: AsyncWrite + Unpin,
{
    let handshake = PeerHandshake::new(info_hash, self_id);
    trace!("sending handshake");
    stream.write_all(&handshake.to_bytes()).await?;
    stream.flush().await?;
    Ok(handshake)
}

pub async fn receive_handshake<R>(stream: &mut R) -> Result<PeerHandshake, PeerError>
where
    R: AsyncRead + Unpin,
{
    let mut bytes = [0u8; PeerHandshake::HANDSHAKE_SIZE];
    stream.read_exact(&mut bytes).await?;

    let handshake = PeerHandshake::from_bytes(&bytes);
    debug!(peer_handshake = ?handshake, "handshake received");
    Ok(handshake)
}
