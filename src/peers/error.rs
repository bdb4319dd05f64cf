use super::PieceIndex;
use std::time::Duration;
use thiserror::Error;

/// malformed length prefixed frame, always fatal for the connection it came from.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    #[error("zero length frame (keep-alive) is not accepted")]
    ZeroLength,

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    Oversized { len: usize, max: usize },

    #[error("stream closed after {available} of {expected} frame bytes")]
    Truncated { expected: usize, available: usize },

    #[error("unknown message tag {0}")]
    UnknownTag(u8),

    #[error("payload of {len} bytes is too short for message tag {tag} (needs {min})")]
    PayloadTooShort { tag: u8, len: usize, min: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeMismatch {
    #[error("protocol mismatch, expected {expected:?} got {received:?}")]
    Protocol { expected: String, received: String },

    #[error("info hash mismatch")]
    InfoHash,
}

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("handshake mismatch: {0}")]
    HandshakeMismatch(#[from] HandshakeMismatch),

    #[error("protocol violation: expected {expected}, got {received}")]
    ProtocolViolation {
        expected: &'static str,
        received: &'static str,
    },

    #[error("block rejected for piece {piece}: {reason}")]
    BlockMismatch { piece: PieceIndex, reason: String },

    #[error("peer does not have piece {0}")]
    MissingPiece(PieceIndex),
}

/// the coarse error classes the download engine acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerErrorKind {
    Transport,
    Framing,
    HandshakeMismatch,
    ProtocolViolation,
    MissingPiece,
}

impl PeerError {
    pub fn kind(&self) -> PeerErrorKind {
        type K = PeerErrorKind;
        match self {
            Self::Transport(_) | Self::ConnectTimeout(_) | Self::ConnectionClosed => K::Transport,
            Self::Framing(_) => K::Framing,
            Self::HandshakeMismatch(_) => K::HandshakeMismatch,
            Self::ProtocolViolation { .. } | Self::BlockMismatch { .. } => K::ProtocolViolation,
            Self::MissingPiece(_) => K::MissingPiece,
        }
    }

    pub fn is_missing_piece(&self) -> bool {
        self.kind() == PeerErrorKind::MissingPiece
    }
}
