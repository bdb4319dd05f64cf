use super::assembler::fetch_piece;
use super::{PeerDescriptor, PeerError, PeerStream, PieceDescriptor, PieceIndex};
use futures::SinkExt;
use tokio_stream::StreamExt;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::peer_protocol::{
    receive_handshake, send_handshake, upgrade_stream, PeerFrames, PeerMessage,
};
use crate::prelude::*;
use crate::torrent::{available_pieces, Bitfield, InfoHash, PeerId};
use std::time::Duration;

pub struct PeerConnector<S: PeerStream> {
    peer: PeerDescriptor,
    stream: S,
}

/// interface type between PeerConnector and PeerSession, a connection whose handshake was
/// verified.
#[derive(Debug)]
pub struct PeerConnection<S: PeerStream> {
    peer: PeerDescriptor,
    peer_id: PeerId,
    stream: S,
}

/// a request-ready session: handshake verified, bitfield known, peer has unchoked us.
#[derive(Debug)]
pub struct PeerSession<S: PeerStream> {
    peer: PeerDescriptor,
    peer_id: PeerId,
    frames: PeerFrames<S>,
    available: Bitfield,
    unchoked: bool,
}

impl PeerConnector<TcpStream> {
    #[instrument(name = "connect to peer", level = "info", fields(peer = %peer), skip_all)]
    pub async fn connect(peer: PeerDescriptor, timeout: Duration) -> Result<Self, PeerError> {
        info!("connecting to peer");
        let stream = tokio::time::timeout(timeout, TcpStream::connect(peer.addr))
            .await
            .map_err(|_| {
                warn!(?timeout, "connect timed out");
                PeerError::ConnectTimeout(timeout)
            })?
            .inspect_err(|err| {
                error!(%err, "failed to connect to peer");
            })?;

        Ok(Self::from_parts(peer, stream))
    }
}

impl<S: PeerStream> PeerConnector<S> {
    pub fn from_parts(peer: PeerDescriptor, stream: S) -> Self {
        Self { peer, stream }
    }

    #[instrument(name = "handshake", level = "info", fields(peer = %self.peer), skip_all)]
    pub async fn handshake(
        self,
        info_hash: InfoHash,
        self_id: PeerId,
    ) -> Result<PeerConnection<S>, PeerError> {
        let Self { peer, mut stream } = self;

        info!("sending handshake to peer");
        let sent = send_handshake(&mut stream, info_hash, self_id).await?;

        info!("waiting for peer handshake");
        let received = receive_handshake(&mut stream).await?;

        sent.verify(&received).inspect_err(|err| {
            warn!(%err, "peer handshake rejected");
        })?;
        info!(peer_id = %received.peer_id, "peer handshake verified");

        Ok(PeerConnection::new(peer, received.peer_id, stream))
    }
}

impl<S: PeerStream> PeerConnection<S> {
    pub fn new(peer: PeerDescriptor, peer_id: PeerId, stream: S) -> Self {
        Self {
            peer,
            peer_id,
            stream,
        }
    }
}

impl PeerSession<TcpStream> {
    /// connect, handshake and negotiate until the peer is ready to serve blocks.
    pub async fn establish(
        peer: PeerDescriptor,
        info_hash: InfoHash,
        self_id: PeerId,
        connect_timeout: Duration,
    ) -> Result<Self, PeerError> {
        let connection = PeerConnector::connect(peer, connect_timeout)
            .await?
            .handshake(info_hash, self_id)
            .await?;

        Self::init_from(connection).await
    }
}

impl<S: PeerStream> PeerSession<S> {
    #[instrument(name = "session setup", level = "info", fields(peer = %peer), skip_all)]
    pub async fn init_from(
        PeerConnection {
            peer,
            peer_id,
            stream,
        }: PeerConnection<S>,
    ) -> Result<PeerSession<S>, PeerError> {
        let mut frames = upgrade_stream(stream);

        type PM = PeerMessage;
        let available = match Self::next_message(&mut frames).await? {
            PM::Bitfield(bitfield) => bitfield,
            other => {
                warn!(received = other.name(), "first message sent by peer was not a bitfield");
                return Err(PeerError::ProtocolViolation {
                    expected: "Bitfield",
                    received: other.name(),
                });
            }
        };
        debug!(pieces = available.count_ones(), "peer bitfield received");

        info!("sending interested");
        frames.send(PM::Interested).await?;

        match Self::next_message(&mut frames).await? {
            PM::Unchoke => info!("peer unchoked"),
            other => {
                warn!(received = other.name(), "expected unchoke after interested");
                return Err(PeerError::ProtocolViolation {
                    expected: "Unchoke",
                    received: other.name(),
                });
            }
        }

        Ok(Self {
            peer,
            peer_id,
            frames,
            available,
            unchoked: true,
        })
    }

    async fn next_message(frames: &mut PeerFrames<S>) -> Result<PeerMessage, PeerError> {
        match frames.next().await {
            Some(msg) => msg,
            None => {
                warn!("peer closed connection during session setup");
                Err(PeerError::ConnectionClosed)
            }
        }
    }

    pub fn peer(&self) -> PeerDescriptor {
        self.peer
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn is_unchoked(&self) -> bool {
        self.unchoked
    }

    pub fn available_pieces(&self) -> Vec<PieceIndex> {
        available_pieces(&self.available)
    }

    pub fn can_handle(&self, index: PieceIndex) -> bool {
        self.available.get(index).is_some_and(|bit| *bit)
    }

    /// fetch every block of `piece`, hash verification is left to the caller.
    #[instrument(name = "download piece", level = "debug", fields(peer = %self.peer, piece = piece.index), skip_all)]
    pub async fn download(&mut self, piece: &PieceDescriptor) -> Result<Vec<u8>, PeerError> {
        if !self.can_handle(piece.index) {
            return Err(PeerError::MissingPiece(piece.index));
        }

        fetch_piece(&mut self.frames, piece).await
    }

    pub async fn close(self) {
        let mut stream = self.frames.into_inner();
        if let Err(err) = stream.shutdown().await {
            debug!(%err, "error while closing peer connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer_protocol::{PeerHandshake, PeerMessageCodec};
    use crate::peers::PeerErrorKind;
    use rstest::{fixture, rstest};
    use std::net::{Ipv4Addr, SocketAddrV4};
    use tokio_test::io::Builder;
    use tokio_util::{bytes::BytesMut, codec::Encoder};

    fn encode(msg: PeerMessage) -> Vec<u8> {
        let mut buffer = BytesMut::new();
        PeerMessageCodec::new().encode(msg, &mut buffer).unwrap();
        buffer.to_vec()
    }

    #[fixture]
    fn peer() -> PeerDescriptor {
        PeerDescriptor::new(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 6881), 0)
    }

    #[fixture]
    fn info_hash() -> InfoHash {
        InfoHash::new([9; 20])
    }

    #[fixture]
    fn client_id() -> PeerId {
        PeerId::random()
    }

    fn connection<S: PeerStream>(peer: PeerDescriptor, stream: S) -> PeerConnection<S> {
        PeerConnection::new(peer, PeerId::new([2; 20]), stream)
    }

    #[rstest]
    #[tokio::test]
    async fn test_handshake(peer: PeerDescriptor, info_hash: InfoHash, client_id: PeerId) {
        let sent = PeerHandshake::new(info_hash, client_id);
        let remote_id = PeerId::new([5; 20]);
        let reply = PeerHandshake::new(info_hash, remote_id);

        let mock = Builder::new()
            .write(&sent.to_bytes())
            .read(&reply.to_bytes())
            .build();

        let connection = PeerConnector::from_parts(peer, mock)
            .handshake(info_hash, client_id)
            .await
            .unwrap();

        assert_eq!(connection.peer, peer);
        assert_eq!(connection.peer_id, remote_id);
    }

    #[rstest]
    #[tokio::test]
    async fn test_handshake_wrong_info_hash(
        peer: PeerDescriptor,
        info_hash: InfoHash,
        client_id: PeerId,
    ) {
        let sent = PeerHandshake::new(info_hash, client_id);
        let reply = PeerHandshake::new(InfoHash::new([1; 20]), PeerId::new([5; 20]));

        let mock = Builder::new()
            .write(&sent.to_bytes())
            .read(&reply.to_bytes())
            .build();

        let err = PeerConnector::from_parts(peer, mock)
            .handshake(info_hash, client_id)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), PeerErrorKind::HandshakeMismatch);
    }

    #[rstest]
    #[tokio::test]
    async fn test_init_reads_bitfield_and_waits_for_unchoke(peer: PeerDescriptor) {
        // pieces 0..=2 and 4..=7, piece 3 missing
        let bitfield = Bitfield::from_slice(&[0b1110_1111]);

        let mock = Builder::new()
            .read(&encode(PeerMessage::Bitfield(bitfield)))
            .write(&encode(PeerMessage::Interested))
            .read(&encode(PeerMessage::Unchoke))
            .build();

        let session = PeerSession::init_from(connection(peer, mock)).await.unwrap();

        assert!(session.is_unchoked());
        assert_eq!(session.available_pieces(), vec![0, 1, 2, 4, 5, 6, 7]);
        assert!(!session.can_handle(3));
        assert!(session.can_handle(7));
        assert!(!session.can_handle(8));
    }

    #[rstest]
    #[tokio::test]
    async fn test_init_rejects_missing_bitfield(peer: PeerDescriptor) {
        let mock = Builder::new().read(&encode(PeerMessage::Unchoke)).build();

        let err = PeerSession::init_from(connection(peer, mock)).await.unwrap_err();
        assert!(matches!(
            err,
            PeerError::ProtocolViolation {
                expected: "Bitfield",
                received: "Unchoke"
            }
        ));
    }

    #[rstest]
    #[tokio::test]
    async fn test_init_rejects_choke_after_interested(peer: PeerDescriptor) {
        let mock = Builder::new()
            .read(&encode(PeerMessage::Bitfield(Bitfield::from_slice(&[0xff]))))
            .write(&encode(PeerMessage::Interested))
            .read(&encode(PeerMessage::Choke))
            .build();

        let err = PeerSession::init_from(connection(peer, mock)).await.unwrap_err();
        assert_eq!(err.kind(), PeerErrorKind::ProtocolViolation);
    }

    #[rstest]
    #[tokio::test]
    async fn test_download_unavailable_piece_sends_nothing(peer: PeerDescriptor) {
        let mock = Builder::new()
            .read(&encode(PeerMessage::Bitfield(Bitfield::from_slice(&[0b1110_0000]))))
            .write(&encode(PeerMessage::Interested))
            .read(&encode(PeerMessage::Unchoke))
            .build();

        let mut session = PeerSession::init_from(connection(peer, mock)).await.unwrap();
        let piece = PieceDescriptor::new(3, 10, [0; 20]);

        let err = session.download(&piece).await.unwrap_err();
        assert!(err.is_missing_piece());
    }

    #[rstest]
    #[tokio::test]
    async fn test_download(peer: PeerDescriptor) {
        let data: Vec<u8> = (0..50u8).collect();
        let mock = Builder::new()
            .read(&encode(PeerMessage::Bitfield(Bitfield::from_slice(&[0x80]))))
            .write(&encode(PeerMessage::Interested))
            .read(&encode(PeerMessage::Unchoke))
            .write(&encode(PeerMessage::Request {
                index: 0,
                begin: 0,
                length: 50,
            }))
            .read(&encode(PeerMessage::Piece {
                index: 0,
                begin: 0,
                block: data.clone(),
            }))
            .build();

        let mut session = PeerSession::init_from(connection(peer, mock)).await.unwrap();
        let piece = PieceDescriptor::new(0, 50, [0; 20]);

        assert_eq!(session.download(&piece).await.unwrap(), data);
    }
}
